//! Records of the backend calls made while resolving a graph.

use std::collections::HashMap;
use std::time::Duration;

use http::Method;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::FetchError;

/// One network attempt: what was sent, what came back, and how it failed.
#[derive(Clone, Debug, Serialize)]
pub struct FetchStat {
    pub error: Option<FetchError>,
    pub response: Option<ResponseRecord>,
    pub request: RequestRecord,
}

/// The request as it went on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestRecord {
    /// Full url, including the query string built from `data`.
    pub url: String,
    #[serde(with = "http_serde::method")]
    pub method: Method,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub data: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseRecord {
    pub status: Status,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    /// Time until the response head arrived.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

/// Append-only list shared by every fetch of one resolution.
#[derive(Debug, Default)]
pub(crate) struct FetchStats {
    entries: Mutex<Vec<FetchStat>>,
}

impl FetchStats {
    pub(crate) fn push(&self, stat: FetchStat) {
        self.entries.lock().push(stat);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn into_inner(self) -> Vec<FetchStat> {
        self.entries.into_inner()
    }
}
