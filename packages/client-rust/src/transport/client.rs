//! [`HttpTransport`] backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::config::SweepConfig;
use crate::error::SweepError;

/// Production transport: a pooled `reqwest` client with a bounded timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Builds a transport using the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Transport`] if the TLS backend cannot be initialized.
    pub fn new(config: &SweepConfig) -> Result<Self, SweepError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("sweep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SweepError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout: config.request_timeout,
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SweepError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(self.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SweepError::Transport(format!("request to {} timed out", request.url))
            } else {
                SweepError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| SweepError::Transport(format!("failed to read response body: {e}")))?;

        tracing::debug!(status = status.as_u16(), bytes = body.len(), "response received");

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_configured_timeout() {
        let mut config = SweepConfig::new("1", "key");
        config.request_timeout = Duration::from_secs(3);
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let mut config = SweepConfig::new("1", "key");
        config.request_timeout = Duration::from_secs(2);
        let transport = ReqwestTransport::new(&config).unwrap();
        // Port 9 (discard) on loopback is not expected to accept HTTP.
        let err = transport
            .send(HttpRequest::get("http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Transport(_)));
    }
}
