//! Read-only listing of every entry in a store.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::SweepError;
use crate::runner::ScanRunner;

/// One listed entry: its value, or the error that prevented the fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DumpRecord {
    Entry { key: String, value: Value },
    Failed { key: String, error: String },
}

impl DumpRecord {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Entry { key, .. } | Self::Failed { key, .. } => key,
        }
    }
}

struct DumpPage {
    records: Vec<DumpRecord>,
    next_cursor: Option<String>,
}

impl ScanRunner {
    /// Lists every key of `store` with its current value.
    ///
    /// Per-key fetch failures become [`DumpRecord::Failed`] and the listing
    /// continues. A rate-limited page is discarded and fetched again after
    /// the backoff pause.
    ///
    /// # Errors
    ///
    /// Returns the page-fetch error if a page cannot be listed, and
    /// [`SweepError::Aborted`] if interrupted.
    pub async fn list_key_values(&self, store: &str) -> Result<Vec<DumpRecord>, SweepError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.dump_page(store, cursor.as_deref()).await?;
            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(records),
            }
            self.pacer.pace_after_page().await?;
        }
    }

    /// Writes every entry of `store` to `out` as JSON lines, flushing after
    /// each page. Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Same as [`ScanRunner::list_key_values`], plus [`SweepError::Output`]
    /// if `out` cannot be written.
    pub async fn dump<W>(&self, store: &str, out: &mut W) -> Result<u64, SweepError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = self.dump_page(store, cursor.as_deref()).await?;
            for record in &page.records {
                let mut line = serde_json::to_vec(record)
                    .map_err(|e| SweepError::Decode(format!("encode '{}': {e}", record.key())))?;
                line.push(b'\n');
                out.write_all(&line).await?;
                written += 1;
            }
            out.flush().await?;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
            self.pacer.pace_after_page().await?;
        }
        tracing::info!(store, entries = written, "dump complete");
        Ok(written)
    }

    async fn dump_page(&self, store: &str, cursor: Option<&str>) -> Result<DumpPage, SweepError> {
        let mut consecutive_backoffs = 0;
        loop {
            match self.try_dump_page(store, cursor).await {
                Err(err) if err.is_rate_limited() => {
                    consecutive_backoffs += 1;
                    if consecutive_backoffs > self.config.max_consecutive_backoffs {
                        return Err(err);
                    }
                    tracing::warn!(
                        store,
                        attempt = consecutive_backoffs,
                        "rate limited; retrying page"
                    );
                    self.pacer.backoff_pause().await?;
                }
                other => return other,
            }
        }
    }

    async fn try_dump_page(
        &self,
        store: &str,
        cursor: Option<&str>,
    ) -> Result<DumpPage, SweepError> {
        let page = self
            .abort
            .guard(self.paginator.next_page(store, cursor))
            .await?;
        let last = page.is_last();

        let mut records = Vec::with_capacity(page.keys.len());
        for key in page.keys {
            let fetched = self.abort.guard(self.accessor.fetch(store, &key)).await;
            let record = match fetched {
                Ok(value) => DumpRecord::Entry {
                    key,
                    value: value.into_json(),
                },
                Err(err) if err.is_rate_limited() || matches!(err, SweepError::Aborted) => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "entry fetch failed");
                    DumpRecord::Failed {
                        key,
                        error: err.to_string(),
                    }
                }
            };
            records.push(record);
            self.pacer.pace_after_key().await?;
        }

        Ok(DumpPage {
            records,
            next_cursor: if last { None } else { page.next_cursor },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Method;
    use serde_json::json;

    use super::*;
    use crate::abort::AbortSignal;
    use crate::config::{PacingConfig, SweepConfig};
    use crate::transport::{Fault, MemoryRemote};

    fn runner(remote: &Arc<MemoryRemote>) -> ScanRunner {
        let mut config = SweepConfig::new("1", "key");
        config.page_limit = 2;
        config.pacing = PacingConfig::immediate();
        ScanRunner::new(remote.clone(), Arc::new(config), AbortSignal::never())
    }

    #[tokio::test]
    async fn lists_values_and_failures() {
        let remote = Arc::new(MemoryRemote::with_api_key("key"));
        remote.insert_json("Themes", "a", json!({"Name": "Cats"}));
        remote.insert_text("Themes", "b", "words");
        remote.insert_json("Themes", "c", json!(3));
        remote.inject(Fault::entry(Method::GET, "Themes", "c"));

        let records = runner(&remote).list_key_values("Themes").await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            DumpRecord::Entry {
                key: "a".to_string(),
                value: json!({"Name": "Cats"})
            }
        );
        assert_eq!(
            records[1],
            DumpRecord::Entry {
                key: "b".to_string(),
                value: json!("words")
            }
        );
        assert!(matches!(records[2], DumpRecord::Failed { ref key, .. } if key == "c"));
    }

    #[tokio::test]
    async fn rate_limited_page_is_listed_once() {
        let remote = Arc::new(MemoryRemote::with_api_key("key"));
        remote.insert_json("S", "a", json!(1));
        remote.insert_json("S", "b", json!(2));
        remote.inject(Fault::entry(Method::GET, "S", "b").rate_limited());

        let records = runner(&remote).list_key_values("S").await.unwrap();
        let keys: Vec<&str> = records.iter().map(DumpRecord::key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dump_writes_json_lines() {
        let remote = Arc::new(MemoryRemote::with_api_key("key"));
        remote.insert_json("S", "a", json!({"x": 1}));
        remote.insert_json("S", "b", json!([1]));
        remote.insert_json("S", "c", json!(null));

        let mut out: Vec<u8> = Vec::new();
        let written = runner(&remote).dump("S", &mut out).await.unwrap();
        assert_eq!(written, 3);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"{"key":"a","value":{"x":1}}"#);
        assert_eq!(lines[1], r#"{"key":"b","value":[1]}"#);
        assert_eq!(lines[2], r#"{"key":"c","value":null}"#);
    }
}
