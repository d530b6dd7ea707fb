use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_ENCODING;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use reqwest::multipart;
use serde_json::Value;
use tracing::Instrument;
use url::Url;

use super::Exchange;
use super::Transport;
use super::TransportRequest;
use crate::circuit_breaker::CircuitBreaker;
use crate::circuit_breaker::Disabled;
use crate::configuration;
use crate::error::ConfigurationError;
use crate::error::FetchError;
use crate::error::ResolveError;
use crate::services::Datatype;
use crate::stats::RequestRecord;
use crate::stats::ResponseRecord;
use crate::stats::Status;

/// Which wire protocol a client speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Http2Config {
    /// HTTP/1.1, upgraded to HTTP/2 over TLS when the server offers it.
    Enable,
    /// HTTP/2 with prior knowledge, also over plain text.
    Http2Only,
}

enum Body {
    Empty,
    Bytes(Bytes),
    Multipart(multipart::Form),
}

/// Request ready to be sent, built before any I/O happens.
struct Prepared {
    url: Url,
    headers: HeaderMap,
    body: Body,
    record: RequestRecord,
}

/// HTTP transport.
///
/// Encodes the request according to its datatype, enforces the timeout, decodes gzip and
/// JSON bodies and reports every attempt to the circuit breaker.
#[derive(Clone)]
pub(crate) struct HttpClientService {
    http_client: reqwest::Client,
    circuit_breaker: Arc<dyn CircuitBreaker>,
    default_timeout: Option<Duration>,
}

impl HttpClientService {
    pub(crate) fn new(
        config: &configuration::HttpClient,
        http2: Http2Config,
        circuit_breaker: Arc<dyn CircuitBreaker>,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)));
        if http2 == Http2Config::Http2Only {
            builder = builder.http2_prior_knowledge();
        }
        let http_client = builder
            .build()
            .map_err(|err| ConfigurationError::HttpClient {
                protocol: match http2 {
                    Http2Config::Enable => "http",
                    Http2Config::Http2Only => "http2",
                }
                .to_string(),
                error: err.to_string(),
            })?;

        Ok(Self {
            http_client,
            circuit_breaker,
            default_timeout: config.timeout,
        })
    }

    async fn call(
        &self,
        prepared: Prepared,
        method: Method,
        timeout: Option<Duration>,
    ) -> Exchange {
        let Prepared {
            url,
            headers,
            body,
            record,
        } = prepared;

        let mut request = self.http_client.request(method, url).headers(headers);
        request = match body {
            Body::Empty => request,
            Body::Bytes(bytes) => request.body(bytes),
            Body::Multipart(form) => request.multipart(form),
        };

        tracing::trace!(request = ?record, "sending request");
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, send(request, &record.url))
                .await
                .unwrap_or_else(|_elapsed| {
                    Err((
                        None,
                        FetchError::Timeout {
                            url: record.url.clone(),
                            timeout,
                        },
                    ))
                }),
            None => send(request, &record.url).await,
        };

        match result {
            Ok((response, value)) => Exchange {
                outcome: Ok(value),
                request: record,
                response: Some(response),
            },
            Err((response, err)) => Exchange {
                outcome: Err(err),
                request: record,
                response,
            },
        }
    }
}

type SendError = (Option<ResponseRecord>, FetchError);

async fn send(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<(ResponseRecord, Value), SendError> {
    let started = Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(fetch_error = ?err);
            return Err((None, connection_error(url, &err)));
        }
    };

    let status = response.status();
    let record = ResponseRecord {
        status: Status {
            code: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
        },
        headers: header_map(response.headers()),
        elapsed: started.elapsed(),
    };
    tracing::debug!(status = status.as_u16(), elapsed = ?record.elapsed, "received response");

    if !is_success(status) {
        let err = FetchError::SubrequestHttpError {
            status_code: Some(status.as_u16()),
            url: url.to_string(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        };
        return Err((Some(record), err));
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            let err = FetchError::SubrequestHttpError {
                status_code: Some(status.as_u16()),
                url: url.to_string(),
                reason: err.to_string(),
            };
            return Err((Some(record), err));
        }
    };

    match decode_body(url, &record.headers, bytes) {
        Ok(value) => Ok((record, value)),
        Err(err) => Err((Some(record), err)),
    }
}

#[async_trait::async_trait]
impl Transport for HttpClientService {
    async fn fetch(&self, request: TransportRequest) -> Result<Exchange, ResolveError> {
        let signature = request.signature();
        let circuit_breaker: &dyn CircuitBreaker = if request.circuit_breaker {
            self.circuit_breaker.as_ref()
        } else {
            &Disabled
        };

        // a request refused before any I/O must not take the half-open probe
        let prepared = prepare(&request)?;
        if circuit_breaker.check(&signature) {
            tracing::debug!(%signature, "circuit open, request rejected");
            let url = request.url.split('?').next().unwrap_or_default().to_string();
            return Err(FetchError::CircuitOpen {
                method: request.method.as_str().to_ascii_lowercase(),
                url,
            }
            .into());
        }

        let timeout = request.timeout.or(self.default_timeout);
        let exchange = self
            .call(prepared, request.method.clone(), timeout)
            .instrument(tracing::debug_span!("http_request", %signature))
            .await;

        match &exchange.outcome {
            Ok(_) => circuit_breaker.record(&signature, true),
            Err(err) => {
                tracing::debug!(%signature, error = %err, "request failed");
                circuit_breaker.monitor(&signature);
                circuit_breaker.record(&signature, false);
            }
        }
        Ok(exchange)
    }
}

fn is_success(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_MODIFIED
}

fn connection_error(url: &str, err: &reqwest::Error) -> FetchError {
    FetchError::SubrequestHttpError {
        status_code: err.status().map(|status| status.as_u16()),
        url: url.to_string(),
        reason: err.to_string(),
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Builds the wire request: url with query string, lower-cased headers and encoded body.
fn prepare(request: &TransportRequest) -> Result<Prepared, ResolveError> {
    let malformed = |reason: String| FetchError::MalformedRequest {
        url: request.url.clone(),
        reason,
    };

    let mut url = Url::parse(&request.url).map_err(|err| ConfigurationError::InvalidUrl {
        url: request.url.clone(),
        reason: err.to_string(),
    })?;

    let mut headers = HeaderMap::new();
    for (key, value) in &request.headers {
        let name = HeaderName::from_bytes(key.to_ascii_lowercase().as_bytes())
            .map_err(|err| malformed(format!("invalid header name '{key}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| malformed(format!("invalid value for header '{key}': {err}")))?;
        headers.insert(name, value);
    }

    let body = if request.method == Method::GET || request.method == Method::HEAD {
        let query = urlencode(request.data.as_ref()).map_err(malformed)?;
        if !query.is_empty() {
            let merged = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
                _ => query,
            };
            url.set_query(Some(&merged));
        }
        Body::Empty
    } else {
        match request.datatype {
            Datatype::FormData => {
                let form = form_data(request.data.as_ref()).map_err(malformed)?;
                // reqwest sets the content type, with the boundary, when the form is attached
                headers.remove(CONTENT_TYPE);
                Body::Multipart(form)
            }
            datatype => {
                let bytes = encode_body(datatype, request.data.as_ref()).map_err(malformed)?;
                if let Some(content_type) = datatype.content_type() {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Body::Bytes(bytes)
            }
        }
    };

    let mut recorded_headers = header_map(&headers);
    if let Body::Multipart(form) = &body {
        recorded_headers.insert(
            CONTENT_TYPE.as_str().to_string(),
            format!("multipart/form-data; boundary={}", form.boundary()),
        );
    }
    let record = RequestRecord {
        url: url.to_string(),
        method: request.method.clone(),
        headers: recorded_headers,
        data: request.data.clone(),
    };
    Ok(Prepared {
        url,
        headers,
        body,
        record,
    })
}

fn urlencode(data: Option<&Value>) -> Result<String, String> {
    match data {
        None | Some(Value::Null) => Ok(String::new()),
        Some(data @ Value::Object(_)) => {
            serde_urlencoded::to_string(data).map_err(|err| err.to_string())
        }
        Some(other) => Err(format!("cannot urlencode {other}")),
    }
}

fn encode_body(datatype: Datatype, data: Option<&Value>) -> Result<Bytes, String> {
    match datatype {
        Datatype::Urlencoded => urlencode(data).map(Bytes::from),
        Datatype::Json => serde_json::to_vec(data.unwrap_or(&Value::Null))
            .map(Bytes::from)
            .map_err(|err| err.to_string()),
        Datatype::Text | Datatype::Raw => Ok(match data {
            None | Some(Value::Null) => Bytes::new(),
            Some(Value::String(text)) => Bytes::from(text.clone()),
            Some(other) => Bytes::from(other.to_string()),
        }),
        Datatype::FormData => Err("form-data is encoded as multipart".to_string()),
    }
}

/// Each entry is either a plain value or
/// `{ "value": .., "options": { "filename": .., "contentType": .. } }`.
fn form_data(data: Option<&Value>) -> Result<multipart::Form, String> {
    let entries = match data {
        None | Some(Value::Null) => return Ok(multipart::Form::new()),
        Some(Value::Object(entries)) => entries,
        Some(other) => return Err(format!("cannot encode {other} as form-data")),
    };

    let mut form = multipart::Form::new();
    for (name, entry) in entries {
        let (value, options) = match entry {
            Value::Object(field) if field.contains_key("value") => {
                (&field["value"], field.get("options"))
            }
            value => (value, None),
        };
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let mut part = multipart::Part::text(text);
        if let Some(options) = options {
            if let Some(filename) = options.get("filename").and_then(Value::as_str) {
                part = part.file_name(filename.to_string());
            }
            if let Some(content_type) = options.get("contentType").and_then(Value::as_str) {
                part = part
                    .mime_str(content_type)
                    .map_err(|err| format!("invalid content type for '{name}': {err}"))?;
            }
        }
        form = form.part(name.clone(), part);
    }
    Ok(form)
}

fn decode_body(
    url: &str,
    headers: &HashMap<String, String>,
    body: Bytes,
) -> Result<Value, FetchError> {
    let body = match headers.get(CONTENT_ENCODING.as_str()).map(String::as_str) {
        Some("gzip") => {
            let mut decoded = Vec::new();
            GzDecoder::new(body.as_ref())
                .read_to_end(&mut decoded)
                .map_err(|err| FetchError::Decompression {
                    url: url.to_string(),
                    reason: err.to_string(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                })?;
            Bytes::from(decoded)
        }
        _ => body,
    };

    if is_json(headers.get(CONTENT_TYPE.as_str())) {
        serde_json::from_slice(&body).map_err(|err| FetchError::MalformedResponse {
            url: url.to_string(),
            reason: err.to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    } else {
        Ok(Value::String(String::from_utf8_lossy(&body).into_owned()))
    }
}

fn is_json(content_type: Option<&String>) -> bool {
    content_type
        .and_then(|content_type| content_type.parse::<mime::Mime>().ok())
        .is_some_and(|mime| mime.type_() == mime::APPLICATION && mime.subtype() == mime::JSON)
}
