//! Cursor-driven enumeration of a store's keys.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::transport::{HttpRequest, HttpTransport, API_KEY_HEADER};

/// One page of key names plus the cursor to the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Keys in the order the remote returned them.
    pub keys: Vec<String>,
    /// Cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl Page {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none() || self.keys.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct KeyInfo {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesResponse {
    #[serde(default)]
    keys: Vec<KeyInfo>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

/// Lists keys one page at a time. Read-only.
#[derive(Clone)]
pub struct Paginator {
    transport: Arc<dyn HttpTransport>,
    config: Arc<SweepConfig>,
    limit: u32,
}

impl Paginator {
    /// Creates a paginator using the configured page limit, clamped to the
    /// remote maximum before any call is made.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, config: Arc<SweepConfig>) -> Self {
        let limit = config.effective_page_limit();
        if limit != config.page_limit {
            tracing::warn!(
                requested = config.page_limit,
                limit,
                "page limit outside the accepted range; clamped"
            );
        }
        Self {
            transport,
            config,
            limit,
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Fetches the page after `cursor`, or the first page when `None`.
    ///
    /// # Errors
    ///
    /// - [`SweepError::InvalidRequest`] for an empty store name
    /// - [`SweepError::RateLimited`] on 429, [`SweepError::Remote`] on other
    ///   non-success statuses
    /// - [`SweepError::Decode`] if the body is not a key listing
    pub async fn next_page(&self, store: &str, cursor: Option<&str>) -> Result<Page, SweepError> {
        if store.is_empty() {
            return Err(SweepError::InvalidRequest(
                "store name must not be empty".to_string(),
            ));
        }

        let mut request = HttpRequest::get(self.config.datastore_url("datastore/entries"))
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .query("datastoreName", store)
            .query("limit", self.limit.to_string());
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            request = request.query("cursor", cursor);
        }

        let response = self.transport.send(request).await?.error_for_status()?;
        let listing: ListEntriesResponse = serde_json::from_str(&response.body)
            .map_err(|e| SweepError::Decode(format!("list entries for '{store}': {e}")))?;

        let page = Page {
            keys: listing.keys.into_iter().map(|k| k.key).collect(),
            next_cursor: listing.next_page_cursor.filter(|c| !c.is_empty()),
        };
        tracing::debug!(
            store,
            keys = page.keys.len(),
            last = page.is_last(),
            "fetched key page"
        );
        Ok(page)
    }
}
