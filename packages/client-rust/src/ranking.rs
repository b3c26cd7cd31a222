//! Ranking collaborator: a memory-store sorted map keyed by player key.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::transport::{HttpRequest, HttpTransport, API_KEY_HEADER};

/// Receives ranked records ordered by `sort_value`.
#[async_trait]
pub trait RankingSink: Send + Sync {
    /// Inserts or replaces `key` in `map_name`.
    async fn upsert_ranked(
        &self,
        map_name: &str,
        key: &str,
        record: &Value,
        sort_value: i64,
    ) -> Result<(), SweepError>;
}

/// [`RankingSink`] writing to an Open Cloud memory-store sorted map.
#[derive(Clone)]
pub struct SortedMapClient {
    transport: Arc<dyn HttpTransport>,
    config: Arc<SweepConfig>,
}

impl SortedMapClient {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, config: Arc<SweepConfig>) -> Self {
        Self { transport, config }
    }
}

#[async_trait]
impl RankingSink for SortedMapClient {
    async fn upsert_ranked(
        &self,
        map_name: &str,
        key: &str,
        record: &Value,
        sort_value: i64,
    ) -> Result<(), SweepError> {
        let url = self
            .config
            .memory_store_url(&format!("sorted-maps/{map_name}/entries/entry"));
        let request = HttpRequest::post(url)
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .header("content-type", "application/json")
            .query("universeId", self.config.universe_id.as_str())
            .json(json!({
                "key": key,
                "value": record,
                "sortKey": sort_value,
            }));
        self.transport.send(request).await?.error_for_status()?;
        Ok(())
    }
}
