//! The store scan engine.
//!
//! A scan walks a store page by page. Each key on a page is fetched (when
//! the transform needs the value), transformed, and written back, deleted,
//! or forwarded to the ranking sink, with a pause after every key and after
//! every page. Per-key failures are recorded and the scan moves on. A 429
//! anywhere on a page pauses and restarts the page from its first key. Keys
//! already counted on an earlier pass of the page are not counted again, and
//! error records from the discarded pass are dropped.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use sweep_core::{AggregateWrite, Task, Transform, TransformOutcome};
use tracing::Instrument;

use crate::abort::AbortSignal;
use crate::accessor::EntryAccessor;
use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::pacing::Pacer;
use crate::paginator::Paginator;
use crate::ranking::RankingSink;
use crate::transport::HttpTransport;

/// Operator intent, validated before the engine is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    NotConfirmed,
}

impl Confirmation {
    #[must_use]
    pub fn from_flag(confirmed: bool) -> Self {
        if confirmed {
            Self::Confirmed
        } else {
            Self::NotConfirmed
        }
    }

    #[must_use]
    pub fn is_confirmed(self) -> bool {
        self == Self::Confirmed
    }
}

/// How a store scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Failed { reason: String },
    Aborted,
}

/// A key that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyError {
    pub key: String,
    pub error: String,
    /// HTTP status of the failing call, when there was one.
    pub status: Option<u16>,
}

/// Running counters for one store scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounts {
    /// Keys handled without error, skips included.
    pub processed: u64,
    /// Entries overwritten, the aggregate write included.
    pub updated: u64,
    pub deleted: u64,
    /// Records sent to the ranking sink.
    pub forwarded: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Pages completed.
    pub pages: u64,
    /// 429 responses observed. Never rewound.
    pub rate_limited: u64,
}

impl ScanCounts {
    fn tally(&mut self, effect: KeyEffect) {
        self.processed += 1;
        match effect {
            KeyEffect::Updated => self.updated += 1,
            KeyEffect::Deleted => self.deleted += 1,
            KeyEffect::Forwarded => self.forwarded += 1,
            KeyEffect::Skipped => self.skipped += 1,
            KeyEffect::Collected => {}
        }
    }
}

/// What handling one key did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyEffect {
    Updated,
    Deleted,
    Forwarded,
    Collected,
    Skipped,
}

/// Bookkeeping for the page in progress. Survives rate-limit restarts of
/// the page and is replaced once the page completes.
#[derive(Debug)]
struct PageProgress {
    start: ScanCounts,
    key_errors: usize,
    /// Keys whose effect is already in the counts.
    counted: HashSet<String>,
}

/// Outcome and counters of one store scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub store: String,
    pub task: Task,
    pub counts: ScanCounts,
    pub key_errors: Vec<KeyError>,
    pub outcome: ScanOutcome,
}

impl ScanResult {
    fn new(store: &str, task: Task) -> Self {
        Self {
            store: store.to_string(),
            task,
            counts: ScanCounts::default(),
            key_errors: Vec::new(),
            outcome: ScanOutcome::Completed,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ScanOutcome::Completed
    }

    fn begin_page(&self) -> PageProgress {
        PageProgress {
            start: self.counts,
            key_errors: self.key_errors.len(),
            counted: HashSet::new(),
        }
    }

    /// Drops the errors recorded by an interrupted pass over the page. The
    /// keys are listed again and their errors re-evaluated on the retry.
    /// Counted effects stay: a deleted key is never listed again.
    fn discard_pass_errors(&mut self, page: &PageProgress) {
        self.counts.errors = page.start.errors;
        self.key_errors.truncate(page.key_errors);
    }

    fn record_error(&mut self, key: &str, error: &SweepError) {
        self.counts.errors += 1;
        self.key_errors.push(KeyError {
            key: key.to_string(),
            error: error.to_string(),
            status: error.status().map(|s| s.as_u16()),
        });
    }
}

/// Errors that end the current page instead of being recorded per key.
fn interrupts_page(error: &SweepError) -> bool {
    matches!(
        error,
        SweepError::RateLimited { .. } | SweepError::Aborted | SweepError::NoRankingSink { .. }
    )
}

fn emit_page_metrics(store: &str, before: &ScanCounts, after: &ScanCounts) {
    let processed = after.processed.saturating_sub(before.processed);
    let errors = after.errors.saturating_sub(before.errors);
    if processed > 0 {
        counter!("sweep_keys_processed_total", "store" => store.to_string()).increment(processed);
    }
    if errors > 0 {
        counter!("sweep_key_errors_total", "store" => store.to_string()).increment(errors);
    }
}

/// Runs transforms over whole stores. Single worker; every remote call is
/// sequential.
pub struct ScanRunner {
    pub(crate) config: Arc<SweepConfig>,
    pub(crate) paginator: Paginator,
    pub(crate) accessor: EntryAccessor,
    pub(crate) pacer: Pacer,
    pub(crate) abort: AbortSignal,
    ranking: Option<Arc<dyn RankingSink>>,
}

impl ScanRunner {
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        config: Arc<SweepConfig>,
        abort: AbortSignal,
    ) -> Self {
        Self {
            paginator: Paginator::new(Arc::clone(&transport), Arc::clone(&config)),
            accessor: EntryAccessor::new(transport, Arc::clone(&config)),
            pacer: Pacer::new(config.pacing.clone(), abort.clone()),
            abort,
            config,
            ranking: None,
        }
    }

    /// Attaches the sink that receives [`TransformOutcome::Rank`] updates.
    #[must_use]
    pub fn with_ranking(mut self, sink: Arc<dyn RankingSink>) -> Self {
        self.ranking = Some(sink);
        self
    }

    /// Scans `store` with `transform`.
    ///
    /// Remote failures during the scan never surface as `Err`; they end up
    /// in the result's key errors or its [`ScanOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Unconfirmed`] without making any call when
    /// `confirmation` is not [`Confirmation::Confirmed`].
    pub async fn run(
        &self,
        store: &str,
        transform: &mut dyn Transform,
        confirmation: Confirmation,
    ) -> Result<ScanResult, SweepError> {
        let task = transform.task();
        if !confirmation.is_confirmed() {
            return Err(SweepError::Unconfirmed { task });
        }
        let span = tracing::info_span!("scan", store, task = task.as_str());
        Ok(self.scan(store, transform).instrument(span).await)
    }

    /// Scans each store in turn with a fresh transform from `make_transform`.
    ///
    /// A failed store does not stop the run; an abort does.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Unconfirmed`] when `confirmation` is not
    /// [`Confirmation::Confirmed`].
    pub async fn run_all<F>(
        &self,
        stores: &[String],
        mut make_transform: F,
        confirmation: Confirmation,
    ) -> Result<Vec<ScanResult>, SweepError>
    where
        F: FnMut(&str) -> Box<dyn Transform>,
    {
        let mut results = Vec::with_capacity(stores.len());
        for store in stores {
            let mut transform = make_transform(store);
            let result = self.run(store, transform.as_mut(), confirmation).await?;
            let aborted = result.outcome == ScanOutcome::Aborted;
            results.push(result);
            if aborted {
                break;
            }
        }
        Ok(results)
    }

    async fn scan(&self, store: &str, transform: &mut dyn Transform) -> ScanResult {
        let mut result = ScanResult::new(store, transform.task());
        let mut cursor: Option<String> = None;
        let mut consecutive_backoffs = 0;
        tracing::info!(page_limit = self.paginator.limit(), "scan started");

        let mut page = result.begin_page();
        let outcome = loop {
            match self
                .scan_page(store, cursor.as_deref(), transform, &mut result, &mut page)
                .await
            {
                Ok(next) => {
                    consecutive_backoffs = 0;
                    result.counts.pages += 1;
                    emit_page_metrics(store, &page.start, &result.counts);
                    tracing::info!(
                        page = result.counts.pages,
                        processed = result.counts.processed,
                        updated = result.counts.updated,
                        deleted = result.counts.deleted,
                        errors = result.counts.errors,
                        "page complete"
                    );
                    let Some(next) = next else {
                        break ScanOutcome::Completed;
                    };
                    cursor = Some(next);
                    page = result.begin_page();
                    if self.pacer.pace_after_page().await.is_err() {
                        break ScanOutcome::Aborted;
                    }
                }
                Err(err) if err.is_rate_limited() => {
                    result.discard_pass_errors(&page);
                    if let Err(outcome) = self
                        .back_off(store, &mut result, &mut consecutive_backoffs)
                        .await
                    {
                        break outcome;
                    }
                }
                Err(SweepError::Aborted) => {
                    emit_page_metrics(store, &page.start, &result.counts);
                    break ScanOutcome::Aborted;
                }
                Err(err) => {
                    emit_page_metrics(store, &page.start, &result.counts);
                    tracing::error!(error = %err, "scan stopped");
                    break ScanOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            }
        };

        result.outcome = match outcome {
            ScanOutcome::Completed => match transform.finish() {
                Ok(Some(write)) => self.write_aggregate(store, &write, &mut result).await,
                Ok(None) => ScanOutcome::Completed,
                Err(err) => {
                    tracing::error!(error = %err, "aggregate could not be built");
                    ScanOutcome::Failed {
                        reason: format!("aggregate could not be built: {err}"),
                    }
                }
            },
            other => other,
        };

        let counts = &result.counts;
        match &result.outcome {
            ScanOutcome::Completed => tracing::info!(
                processed = counts.processed,
                updated = counts.updated,
                deleted = counts.deleted,
                forwarded = counts.forwarded,
                skipped = counts.skipped,
                errors = counts.errors,
                rate_limited = counts.rate_limited,
                "scan completed"
            ),
            ScanOutcome::Failed { reason } => tracing::error!(
                processed = counts.processed,
                errors = counts.errors,
                reason = %reason,
                "scan failed"
            ),
            ScanOutcome::Aborted => tracing::warn!(
                processed = counts.processed,
                errors = counts.errors,
                "scan aborted"
            ),
        }
        result
    }

    /// Processes one page. Returns the cursor of the next page, or `None`
    /// when this page was the last.
    async fn scan_page(
        &self,
        store: &str,
        cursor: Option<&str>,
        transform: &mut dyn Transform,
        result: &mut ScanResult,
        progress: &mut PageProgress,
    ) -> Result<Option<String>, SweepError> {
        let page = self
            .abort
            .guard(self.paginator.next_page(store, cursor))
            .await?;
        let last = page.is_last();

        for key in &page.keys {
            let counted = progress.counted.contains(key);
            match self.process_key(store, key, transform).await {
                Ok(effect) => {
                    if !counted {
                        result.counts.tally(effect);
                        progress.counted.insert(key.clone());
                    }
                }
                Err(err) if interrupts_page(&err) => return Err(err),
                Err(err) if counted => {
                    tracing::warn!(key = %key, error = %err, "counted key failed on retry");
                }
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        status = err.status().map(|s| s.as_u16()),
                        error = %err,
                        "key failed"
                    );
                    result.record_error(key, &err);
                }
            }
            self.pacer.pace_after_key().await?;
        }

        Ok(if last { None } else { page.next_cursor })
    }

    async fn process_key(
        &self,
        store: &str,
        key: &str,
        transform: &mut dyn Transform,
    ) -> Result<KeyEffect, SweepError> {
        let value = if transform.needs_value() {
            Some(self.abort.guard(self.accessor.fetch(store, key)).await?)
        } else {
            None
        };

        let effect = match transform.apply(key, value.as_ref())? {
            TransformOutcome::Write(new_value) => {
                self.abort
                    .guard(self.accessor.write(store, key, &new_value))
                    .await?;
                KeyEffect::Updated
            }
            TransformOutcome::Delete => {
                self.abort.guard(self.accessor.delete(store, key)).await?;
                KeyEffect::Deleted
            }
            TransformOutcome::Rank(update) => {
                let sink = self
                    .ranking
                    .as_ref()
                    .ok_or_else(|| SweepError::NoRankingSink {
                        map_name: update.map_name.clone(),
                    })?;
                self.abort
                    .guard(sink.upsert_ranked(
                        &update.map_name,
                        &update.key,
                        &update.record,
                        update.sort_value,
                    ))
                    .await?;
                KeyEffect::Forwarded
            }
            TransformOutcome::Collected => KeyEffect::Collected,
            TransformOutcome::Skip { reason } => {
                tracing::warn!(key, reason = %reason, "key skipped");
                KeyEffect::Skipped
            }
        };
        Ok(effect)
    }

    /// Writes the aggregate produced by [`Transform::finish`], retrying on 429.
    async fn write_aggregate(
        &self,
        store: &str,
        write: &AggregateWrite,
        result: &mut ScanResult,
    ) -> ScanOutcome {
        let target_store = write.store.as_deref().unwrap_or(store);
        let mut consecutive_backoffs = 0;
        loop {
            let attempt = self
                .abort
                .guard(self.accessor.write(target_store, &write.key, &write.value))
                .await;
            match attempt {
                Ok(()) => {
                    result.counts.updated += 1;
                    tracing::info!(target_store, key = %write.key, "aggregate written");
                    return ScanOutcome::Completed;
                }
                Err(err) if err.is_rate_limited() => {
                    if let Err(outcome) = self
                        .back_off(store, result, &mut consecutive_backoffs)
                        .await
                    {
                        return outcome;
                    }
                }
                Err(SweepError::Aborted) => return ScanOutcome::Aborted,
                Err(err) => {
                    tracing::error!(
                        target_store,
                        key = %write.key,
                        error = %err,
                        "aggregate write failed"
                    );
                    return ScanOutcome::Failed {
                        reason: format!("aggregate write to '{target_store}' failed: {err}"),
                    };
                }
            }
        }
    }

    /// Records a 429 and pauses before the retry. Returns the terminal
    /// outcome when the consecutive limit is exceeded or the pause is
    /// interrupted.
    async fn back_off(
        &self,
        store: &str,
        result: &mut ScanResult,
        consecutive: &mut u32,
    ) -> Result<(), ScanOutcome> {
        result.counts.rate_limited += 1;
        counter!("sweep_rate_limited_total", "store" => store.to_string()).increment(1);
        *consecutive += 1;

        let limit = self.config.max_consecutive_backoffs;
        if *consecutive > limit {
            return Err(ScanOutcome::Failed {
                reason: format!("rate limited {} times in a row", *consecutive),
            });
        }
        tracing::warn!(
            attempt = *consecutive,
            limit,
            backoff_secs = self.pacer.backoff_duration().as_secs(),
            "rate limited; restarting page after backoff"
        );
        self.pacer
            .backoff_pause()
            .await
            .map_err(|_| ScanOutcome::Aborted)
    }
}
