//! Router errors.
use std::fmt;
use std::time::Duration;

use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;
use tower::BoxError;

pub use crate::configuration::ConfigurationError;

/// Error types for a single backend fetch.
///
/// These are the failures a field's `fallback` hook is allowed to absorb. They are stored
/// as-is in [`crate::FetchStat`] entries, so they must stay cheap to clone.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// request to '{url}' was malformed: {reason}
    MalformedRequest {
        /// The url the request was meant for.
        url: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// HTTP fetch failed from '{url}': {reason}
    ///
    /// note that this relates to a transport error: either the connection failed (no status
    /// code) or the backend answered outside of the success range.
    SubrequestHttpError {
        /// The status code sent by the backend, if one was received.
        status_code: Option<u16>,

        /// The url that failed.
        url: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// request to '{url}' timed out after {timeout:?}
    Timeout {
        /// The url that did not answer in time.
        url: String,

        /// The deadline that elapsed.
        #[serde(with = "humantime_serde")]
        timeout: Duration,
    },

    /// circuit break for {method} {url}
    CircuitOpen {
        /// Lower-cased request method.
        method: String,

        /// Request url without its query string.
        url: String,
    },

    /// response from '{url}' could not be decompressed: {reason}
    Decompression {
        /// The url that answered.
        url: String,

        /// The decoder failure.
        reason: String,

        /// The raw, still compressed, body.
        body: String,
    },

    /// response from '{url}' was malformed JSON: {reason}
    MalformedResponse {
        /// The url that answered.
        url: String,

        /// The parser failure.
        reason: String,

        /// The raw response text.
        body: String,
    },
}

impl FetchError {
    /// The HTTP status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::SubrequestHttpError { status_code, .. } => *status_code,
            _ => None,
        }
    }

    pub(crate) fn extension_code(&self) -> &'static str {
        match self {
            FetchError::MalformedRequest { .. } => "MALFORMED_REQUEST",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::Timeout { .. } => "SUBREQUEST_TIMEOUT",
            FetchError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            FetchError::Decompression { .. } => "SUBREQUEST_DECOMPRESSION_ERROR",
            FetchError::MalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
        }
    }
}

/// Outcome of a hook that did not produce a value.
///
/// `Unresolved` is not a failure: the hook read a field that has not been resolved yet, so
/// the attempt is abandoned and retried in the next round.
#[derive(Error, Display, Debug)]
pub enum HookError {
    /// '{0}' is not resolved yet
    Unresolved(String),

    /// '{0}' is not defined in context
    Undefined(String),

    /// {0}
    Failed(#[source] BoxError),
}

impl HookError {
    /// Wrap any error as a hook failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        HookError::Failed(err.into())
    }
}

impl From<BoxError> for HookError {
    fn from(err: BoxError) -> Self {
        HookError::Failed(err)
    }
}

impl From<serde_json::Error> for HookError {
    fn from(err: serde_json::Error) -> Self {
        HookError::Failed(Box::new(err))
    }
}

/// Errors returned by [`crate::GraphResolver::resolve`].
///
/// Any of these aborts the whole resolution: no partial output is produced.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ResolveError {
    /// {0}
    Configuration(#[from] ConfigurationError),

    /// {0}
    Fetch(#[from] FetchError),

    /// circular reference in context: {blocked}
    CircularDependency {
        /// Each unresolved field with the dependency it last waited on, if known.
        blocked: BlockedFields,
    },

    /// dependency depth exceeded max_depends={max_depends}, still unresolved: {fields:?}
    DependencyDepthExceeded {
        /// The configured bound.
        max_depends: usize,

        /// Fields left unresolved when the bound was hit.
        fields: Vec<String>,
    },

    /// field '{field}' reads '{dependency}' which is not defined in context
    UndefinedDependency {
        /// The field whose hook performed the read.
        field: String,

        /// The missing key.
        dependency: String,
    },

    /// {hook} hook of field '{field}' failed: {source}
    Hook {
        /// The field the hook belongs to.
        field: String,

        /// Hook name (`when`, `prefilter`, ...).
        hook: &'static str,

        /// The hook failure.
        #[source]
        source: BoxError,
    },
}

impl ResolveError {
    /// The HTTP status code of a propagated backend error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ResolveError::Fetch(err) => err.status_code(),
            _ => None,
        }
    }

    /// Whether a field `fallback` may substitute a value for this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ResolveError::Fetch(_))
    }
}

/// Unresolved fields paired with the dependency each one last waited on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockedFields(pub Vec<(String, Option<String>)>);

impl fmt::Display for BlockedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (field, dependency)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match dependency {
                Some(dependency) => write!(f, "{field} waits on {dependency}")?,
                None => f.write_str(field)?,
            }
        }
        Ok(())
    }
}
