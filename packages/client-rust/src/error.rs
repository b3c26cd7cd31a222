//! Error taxonomy for remote store calls and scans.

use http::StatusCode;
use sweep_core::TransformError;

use crate::config::ConfigError;

/// Errors returned by remote store calls and the scan engine.
///
/// Per-key errors (`NotFound`, `Malformed`, and `Remote` on an entry call) are
/// recorded by the scan and do not stop it. `RateLimited` triggers a backoff
/// and page restart instead of being counted as a failure.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Any non-success HTTP outcome other than the documented cases.
    #[error("remote returned {status}: {body}")]
    Remote { status: StatusCode, body: String },
    /// HTTP 429 from the remote.
    #[error("rate limited by remote: {body}")]
    RateLimited { body: String },
    #[error("entry '{key}' not found in store '{store}'")]
    NotFound { store: String, key: String },
    #[error(transparent)]
    Malformed(#[from] TransformError),
    /// Connection, timeout, or body read failure with no usable HTTP status.
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("user '{0}' not found")]
    UserNotFound(String),
    #[error("no ranking sink configured for {map_name}")]
    NoRankingSink { map_name: String },
    #[error("{task} requires confirmation before it can run")]
    Unconfirmed { task: sweep_core::Task },
    #[error("aborted by user")]
    Aborted,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl SweepError {
    /// Maps a non-success status and body to `RateLimited` or `Remote`.
    #[must_use]
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited { body }
        } else {
            Self::Remote { status, body }
        }
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
