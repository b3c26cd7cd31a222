//! HTTP transport seam between the scan engine and the remote API.
//!
//! The engine only ever talks to an [`HttpTransport`]. Production uses
//! [`ReqwestTransport`]. Tests use [`MemoryRemote`], built with `cfg(test)`
//! or the `test-util` feature, which emulates the Open Cloud endpoints in
//! memory.

pub mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::Value;

use crate::error::SweepError;

pub use client::ReqwestTransport;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{Fault, MemoryRemote, RecordedCall, Route};

/// Header carrying the Open Cloud API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// A single outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON body, if any. Serialized with `content-type: application/json`.
    pub body: Option<Value>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// First query parameter named `name`.
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response with its body already read.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    /// Response with a JSON body.
    #[must_use]
    pub fn json(status: StatusCode, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        }
    }

    /// Response with a plain-text body.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain".to_string()),
            body: body.into(),
        }
    }

    /// Response with no body.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Converts a non-success response into the matching [`SweepError`].
    ///
    /// # Errors
    ///
    /// Returns `Remote` or `RateLimited` when the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, SweepError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SweepError::from_status(self.status, self.body))
        }
    }
}

/// Sends requests to the remote API.
///
/// Implementations apply the call timeout and report connection-level
/// failures as [`SweepError::Transport`]. Non-success statuses are returned
/// as ordinary responses; callers decide what they mean.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SweepError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_builder_collects_parts() {
        let req = HttpRequest::post("http://x/entry")
            .query("datastoreName", "Players")
            .query("entryKey", "k1")
            .header("X-Api-Key", "secret")
            .json(json!({"a": 1}));

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.query_value("entryKey"), Some("k1"));
        assert_eq!(req.query_value("missing"), None);
        assert_eq!(req.header_value(API_KEY_HEADER), Some("secret"));
        assert_eq!(req.body, Some(json!({"a": 1})));
    }

    #[test]
    fn error_for_status_maps_failures() {
        let ok = HttpResponse::empty(StatusCode::NO_CONTENT).error_for_status();
        assert!(ok.is_ok());

        let limited = HttpResponse::text(StatusCode::TOO_MANY_REQUESTS, "slow").error_for_status();
        assert!(limited.unwrap_err().is_rate_limited());

        let failed = HttpResponse::text(StatusCode::BAD_GATEWAY, "down").error_for_status();
        assert_eq!(failed.unwrap_err().status(), Some(StatusCode::BAD_GATEWAY));
    }
}
