use std::collections::HashMap;
use std::time::Duration;

use http::Method;
use serde_json::Value;

use crate::error::FetchError;
use crate::error::ResolveError;
use crate::services::Datatype;
use crate::services::FetchOptions;
use crate::stats::RequestRecord;
use crate::stats::ResponseRecord;

pub(crate) mod service;

pub(crate) use service::Http2Config;
pub(crate) use service::HttpClientService;

/// A fully addressed outbound call, as handed to a [`Transport`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TransportRequest {
    /// Absolute url, service address and path joined.
    pub url: String,
    pub method: Method,
    pub datatype: Datatype,
    pub data: Option<Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    /// Whether the circuit breaker is consulted and updated for this call.
    pub circuit_breaker: bool,
}

impl TransportRequest {
    pub(crate) fn new(url: String, options: FetchOptions, circuit_breaker: bool) -> Self {
        Self {
            url,
            method: options.method,
            datatype: options.datatype,
            data: options.data,
            headers: options.headers,
            timeout: options.timeout,
            circuit_breaker,
        }
    }

    /// Circuit breaker key: `[method] url` without the query string.
    pub fn signature(&self) -> String {
        let url = self.url.split('?').next().unwrap_or_default();
        format!("[{}] {url}", self.method.as_str().to_ascii_lowercase())
    }
}

/// The result of one network attempt, with what was sent and received.
#[derive(Debug)]
pub struct Exchange {
    pub outcome: Result<Value, FetchError>,
    pub request: RequestRecord,
    pub response: Option<ResponseRecord>,
}

/// Executes one outbound call for a protocol.
///
/// An `Err` means the call was refused before any I/O (bad configuration, open circuit,
/// unencodable data) and no attempt is recorded. Every `Ok` exchange is an attempt, whether
/// or not it succeeded.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: TransportRequest) -> Result<Exchange, ResolveError>;
}
