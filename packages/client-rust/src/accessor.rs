//! Single-entry reads, writes, and deletes.

use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;
use sweep_core::EntryValue;

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::transport::{HttpRequest, HttpTransport, API_KEY_HEADER};

/// Reads and writes individual entries through the remote API.
///
/// Every read is a fresh fetch and every write is an unconditional
/// overwrite; there is no version check.
#[derive(Clone)]
pub struct EntryAccessor {
    transport: Arc<dyn HttpTransport>,
    config: Arc<SweepConfig>,
}

impl EntryAccessor {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, config: Arc<SweepConfig>) -> Self {
        Self { transport, config }
    }

    fn entry_request(&self, request: HttpRequest, store: &str, key: &str) -> HttpRequest {
        request
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .query("datastoreName", store)
            .query("entryKey", key)
    }

    fn entry_url(&self) -> String {
        self.config.datastore_url("datastore/entries/entry")
    }

    /// Fetches the current value of `key`.
    ///
    /// # Errors
    ///
    /// - [`SweepError::NotFound`] if the entry does not exist (it may have
    ///   been deleted since the key was listed)
    /// - [`SweepError::RateLimited`] / [`SweepError::Remote`] on other failures
    pub async fn fetch(&self, store: &str, key: &str) -> Result<EntryValue, SweepError> {
        let request = self.entry_request(HttpRequest::get(self.entry_url()), store, key);
        let response = self.transport.send(request).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(SweepError::NotFound {
                store: store.to_string(),
                key: key.to_string(),
            });
        }
        let response = response.error_for_status()?;
        Ok(EntryValue::decode(
            response.content_type.as_deref(),
            &response.body,
        ))
    }

    /// Overwrites `key` with `value`, serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::RateLimited`] / [`SweepError::Remote`] on a
    /// non-success status.
    pub async fn write(&self, store: &str, key: &str, value: &Value) -> Result<(), SweepError> {
        let request = self
            .entry_request(HttpRequest::post(self.entry_url()), store, key)
            .header("content-type", "application/json")
            .json(value.clone());
        self.transport.send(request).await?.error_for_status()?;
        tracing::debug!(store, key, "entry written");
        Ok(())
    }

    /// Deletes `key`.
    ///
    /// Only `204 No Content` counts as success; a body-bearing 2xx is
    /// reported as a remote error.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::RateLimited`] / [`SweepError::Remote`] for any
    /// status other than 204.
    pub async fn delete(&self, store: &str, key: &str) -> Result<(), SweepError> {
        let request = self.entry_request(HttpRequest::delete(self.entry_url()), store, key);
        let response = self.transport.send(request).await?;
        if response.status == StatusCode::NO_CONTENT {
            tracing::debug!(store, key, "entry deleted");
            return Ok(());
        }
        Err(SweepError::from_status(response.status, response.body))
    }
}
