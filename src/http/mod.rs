//! Upstream HTTP layer: request/response types and the transport retrier.

mod retry;
mod transport;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;

pub use retry::{RetryPolicy, TRANSIENT_ERROR_MARKERS, TransportError, backoff_delay, is_transient};
pub use transport::{HttpSend, PreparedRequest, ReqwestSender, TransportRetrier};

#[cfg(test)]
pub use transport::MockHttpSend;

/// Payload of a logical request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent verbatim.
    Text(String),
    /// Serialized with `serde_json` before sending.
    Json(Value),
}

impl RequestBody {
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        match self {
            RequestBody::Text(text) => Ok(text.clone()),
            RequestBody::Json(value) => serde_json::to_string(value),
        }
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

/// One logical request, immutable for the lifetime of a dispatch.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<RequestBody>,
    /// Extra headers. These override the defaults on name collision.
    pub headers: HeaderMap,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// A completed upstream exchange.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Joins `base_url` and `path` with exactly one slash at the seam.
///
/// - `""` and `"/"` map to `base_url` itself
/// - `"/v1/x"` and `"v1/x"` both become `{base_url}/v1/x`
///
/// Slashes on either side of the seam are collapsed to one.
pub fn resolve_url(base_url: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base_url.to_string();
    }

    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
