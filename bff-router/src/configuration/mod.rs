//! Logic for loading configuration in to an object model
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;


/// Configuration error.
///
/// These are never absorbed by a field `fallback`: they describe a gateway that cannot work
/// as configured.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// service {0} isn't registered
    UnknownService(String),

    /// service {service} uses the {protocol} protocol which isn't supported
    UnsupportedProtocol { service: String, protocol: String },

    /// field '{0}' has neither a prefilter nor a fake
    MissingPrefilter(String),

    /// field '{0}' returned an empty rule chain
    EmptyRuleChain(String),

    /// invalid datatype: {0}
    InvalidDatatype(String),

    /// invalid url '{url}': {reason}
    InvalidUrl { url: String, reason: String },

    /// graph key '{0}' is reserved
    ReservedField(String),

    /// graph field '{0}' is declared more than once
    DuplicateField(String),

    /// could not build the http client for {protocol}: {error}
    HttpClient { protocol: String, error: String },

    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration for the gateway.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or parsed from YAML with [`str::parse`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Mapping of logical service name to the backend that serves it.
    #[serde(default)]
    pub(crate) services: HashMap<String, Service>,

    /// Defaults applied to every graph resolution.
    #[serde(default)]
    pub(crate) resolver: Resolver,

    /// Health tracking of backend endpoints.
    #[serde(default)]
    pub(crate) circuit_breaker: CircuitBreaker,

    /// Outbound http client settings.
    #[serde(default)]
    pub(crate) http: HttpClient,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(
        services: HashMap<String, Service>,
        resolver: Option<Resolver>,
        circuit_breaker: Option<CircuitBreaker>,
        http: Option<HttpClient>,
    ) -> Self {
        Self {
            services,
            resolver: resolver.unwrap_or_default(),
            circuit_breaker: circuit_breaker.unwrap_or_default(),
            http: http.unwrap_or_default(),
        }
    }

    /// The registered services.
    pub fn services(&self) -> &HashMap<String, Service> {
        &self.services
    }

    /// Generate a JSON schema for the configuration file.
    pub fn schema() -> RootSchema {
        let settings = SchemaSettings::draft2019_09().with(|s| {
            s.option_nullable = true;
            s.option_add_null_type = false;
        });
        settings.into_generator().into_root_schema_for::<Configuration>()
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(|err| ConfigurationError::InvalidConfiguration {
            message: "could not parse configuration",
            error: err.to_string(),
        })
    }
}

/// A backend service.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Service {
    /// Transport used to reach the service: `http`, `https` or `http2`.
    pub protocol: String,

    /// Base url; fetch paths are appended to it verbatim.
    pub address: String,
}

impl Service {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
        }
    }
}

/// Resolution defaults.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Resolver {
    /// Leave null public fields out of the output.
    pub skip_null: bool,

    /// Consult the circuit breaker before every fetch.
    pub circuit_breaker: bool,

    /// Maximum number of dependency rounds after the first one.
    pub max_depends: Option<usize>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            skip_null: true,
            circuit_breaker: false,
            max_depends: None,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct CircuitBreaker {
    /// Consecutive failures that open the circuit of a monitored endpoint.
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls before letting a probe through.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub open_duration: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(10),
        }
    }
}

/// Outbound http client settings.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct HttpClient {
    /// Timeout used when a fetch does not set one.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,

    /// Idle pooled connections are closed after this long.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub pool_idle_timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            timeout: None,
            pool_idle_timeout: Duration::from_secs(5),
        }
    }
}
