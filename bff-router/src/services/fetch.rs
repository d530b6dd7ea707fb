//! Options describing one backend call, and how several calls combine into a plan.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::Method;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ConfigurationError;

/// How `data` is encoded into the request body.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum Datatype {
    /// `application/x-www-form-urlencoded`
    #[default]
    Urlencoded,
    /// `application/json`
    Json,
    /// `text/plain`
    Text,
    /// `application/octet-stream`
    Raw,
    /// `multipart/form-data`
    FormData,
}

impl Datatype {
    /// Content type sent for single-part bodies.
    pub(crate) fn content_type(&self) -> Option<&'static str> {
        match self {
            Datatype::Urlencoded => Some("application/x-www-form-urlencoded"),
            Datatype::Json => Some("application/json"),
            Datatype::Text => Some("text/plain"),
            Datatype::Raw => Some("application/octet-stream"),
            // the boundary is only known once the form is built
            Datatype::FormData => None,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Urlencoded => write!(f, "urlencoded"),
            Datatype::Json => write!(f, "json"),
            Datatype::Text => write!(f, "text"),
            Datatype::Raw => write!(f, "raw"),
            Datatype::FormData => write!(f, "form-data"),
        }
    }
}

impl FromStr for Datatype {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "urlencoded" => Ok(Datatype::Urlencoded),
            "json" => Ok(Datatype::Json),
            "text" => Ok(Datatype::Text),
            "raw" => Ok(Datatype::Raw),
            "form-data" => Ok(Datatype::FormData),
            _ => Err(ConfigurationError::InvalidDatatype(s.to_string())),
        }
    }
}

impl TryFrom<String> for Datatype {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn default_method() -> Method {
    Method::GET
}

/// One backend call.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FetchOptions {
    /// Logical service name, looked up in the service registry.
    pub service: String,

    /// Appended verbatim to the service address.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_method", with = "http_serde::method")]
    pub method: Method,

    #[serde(default)]
    pub datatype: Datatype,

    /// Query string for GET and HEAD, body otherwise.
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            service: String::new(),
            path: String::new(),
            method: Method::GET,
            datatype: Datatype::default(),
            data: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }
}

impl FetchOptions {
    /// A GET of `path` on `service`.
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            ..Default::default()
        }
    }
}

/// The backend calls a field needs, as produced by its `prefilter`.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchPlan {
    /// One call; its result is the raw value.
    Single(FetchOptions),

    /// Calls issued concurrently. All of them must succeed; the raw value is the array of
    /// results, in plan order.
    All(Vec<FetchOptions>),

    /// Rules tried one after the other until one succeeds.
    Chain(Vec<FetchOptions>),
}

impl FetchPlan {
    pub(crate) fn len(&self) -> usize {
        match self {
            FetchPlan::Single(_) => 1,
            FetchPlan::All(options) | FetchPlan::Chain(options) => options.len(),
        }
    }

    pub(crate) fn into_options(self) -> Vec<FetchOptions> {
        match self {
            FetchPlan::Single(options) => vec![options],
            FetchPlan::All(options) | FetchPlan::Chain(options) => options,
        }
    }
}

impl From<FetchOptions> for FetchPlan {
    fn from(options: FetchOptions) -> Self {
        FetchPlan::Single(options)
    }
}

impl From<Vec<FetchOptions>> for FetchPlan {
    fn from(options: Vec<FetchOptions>) -> Self {
        FetchPlan::All(options)
    }
}
