//! Routes a fetch to the transport of its service.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use super::FetchOptions;
use super::http::Exchange;
use super::http::Http2Config;
use super::http::HttpClientService;
use super::http::Transport;
use super::http::TransportRequest;
use crate::circuit_breaker::CircuitBreaker;
use crate::configuration::Configuration;
use crate::configuration::Service;
use crate::error::ConfigurationError;
use crate::error::ResolveError;
use crate::stats::FetchStat;
use crate::stats::FetchStats;

/// Service registry plus the transports able to reach the registered services.
///
/// Shared by every resolution. `http` and `https` services go through the HTTP/1.1 client,
/// `http2` services through a client with HTTP/2 prior knowledge.
#[derive(Clone)]
pub struct ServiceDispatcher {
    services: HashMap<String, Service>,
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl ServiceDispatcher {
    pub fn new(
        configuration: &Configuration,
        circuit_breaker: Arc<dyn CircuitBreaker>,
    ) -> Result<Self, ConfigurationError> {
        let http: Arc<dyn Transport> = Arc::new(HttpClientService::new(
            &configuration.http,
            Http2Config::Enable,
            circuit_breaker.clone(),
        )?);
        let http2: Arc<dyn Transport> = Arc::new(HttpClientService::new(
            &configuration.http,
            Http2Config::Http2Only,
            circuit_breaker,
        )?);

        let mut transports = HashMap::new();
        transports.insert("http".to_string(), http.clone());
        transports.insert("https".to_string(), http);
        transports.insert("http2".to_string(), http2);

        Ok(Self {
            services: configuration.services.clone(),
            transports,
        })
    }

    /// Registers `transport` for services declared with `protocol`, replacing any previous one.
    pub fn register(&mut self, protocol: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(protocol.into(), transport);
    }

    /// Performs one backend call.
    ///
    /// Every attempt that reached the transport is appended to `stats` before the outcome is
    /// returned. Calls refused up front (unknown service, open circuit...) leave no entry.
    pub(crate) async fn fetch(
        &self,
        options: FetchOptions,
        circuit_breaker: bool,
        stats: &FetchStats,
    ) -> Result<Value, ResolveError> {
        let service = self
            .services
            .get(&options.service)
            .ok_or_else(|| ConfigurationError::UnknownService(options.service.clone()))?;
        let transport = self.transports.get(&service.protocol).ok_or_else(|| {
            ConfigurationError::UnsupportedProtocol {
                service: options.service.clone(),
                protocol: service.protocol.clone(),
            }
        })?;

        let service_name = options.service.clone();
        let request = TransportRequest::new(
            format!("{}{}", service.address, options.path),
            options,
            circuit_breaker,
        );
        let signature = request.signature();

        let Exchange {
            outcome,
            request,
            response,
        } = transport
            .fetch(request)
            .instrument(tracing::info_span!("fetch", service = %service_name, %signature))
            .await?;

        stats.push(FetchStat {
            error: outcome.as_ref().err().cloned(),
            response,
            request,
        });
        tracing::debug!(
            service = %service_name,
            %signature,
            attempts = stats.len(),
            success = outcome.is_ok(),
            "fetch completed"
        );

        outcome.map_err(ResolveError::from)
    }
}
