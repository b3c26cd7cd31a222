//! Command execution shared by the binary and end-to-end tests.

use std::sync::Arc;

use anyhow::Context;
use sweep_core::transform::DEFAULT_RANKING_MAP;
use sweep_core::{MirrorToRanking, RecomputeLeaderboard, SummarizeThemes, Wipe};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::abort::AbortSignal;
use crate::cli::Command;
use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::ranking::SortedMapClient;
use crate::runner::{Confirmation, ScanOutcome, ScanResult, ScanRunner};
use crate::transport::HttpTransport;
use crate::users;

/// Overall result of a command, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// At least one store scan failed.
    Failed,
    Aborted,
    Misconfigured,
}

impl RunStatus {
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::Misconfigured => 2,
            Self::Aborted => 130,
        }
    }

    /// Aborted wins over failed, failed over success.
    #[must_use]
    pub fn from_results(results: &[ScanResult]) -> Self {
        if results.iter().any(|r| r.outcome == ScanOutcome::Aborted) {
            Self::Aborted
        } else if results.iter().any(|r| !r.is_success()) {
            Self::Failed
        } else {
            Self::Success
        }
    }
}

/// Runs parsed commands against a transport.
pub struct App {
    transport: Arc<dyn HttpTransport>,
    config: Arc<SweepConfig>,
    abort: AbortSignal,
}

impl App {
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        config: Arc<SweepConfig>,
        abort: AbortSignal,
    ) -> Self {
        Self {
            transport,
            config,
            abort,
        }
    }

    /// Executes `command`, writing its report or listing to `out`.
    ///
    /// # Errors
    ///
    /// Fails when a scan is refused for lack of confirmation, when a
    /// username cannot be resolved, or when `out` cannot be written.
    pub async fn execute<W>(
        &self,
        command: &Command,
        confirmation: Confirmation,
        out: &mut W,
    ) -> anyhow::Result<RunStatus>
    where
        W: AsyncWrite + Unpin,
    {
        let runner = ScanRunner::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.config),
            self.abort.clone(),
        );

        let results = match command {
            Command::Wipe { stores } => {
                runner
                    .run_all(stores, |_| Box::new(Wipe), confirmation)
                    .await?
            }
            Command::RecomputeLeaderboard { stores } => {
                runner
                    .run_all(stores, |_| Box::new(RecomputeLeaderboard), confirmation)
                    .await?
            }
            Command::SummarizeThemes {
                stores,
                target_store,
            } => {
                runner
                    .run_all(
                        stores,
                        |_| Box::new(SummarizeThemes::new(target_store.clone())),
                        confirmation,
                    )
                    .await?
            }
            Command::MirrorRanking { stores, map } => {
                let sink =
                    SortedMapClient::new(Arc::clone(&self.transport), Arc::clone(&self.config));
                let map = if map.is_empty() {
                    DEFAULT_RANKING_MAP
                } else {
                    map.as_str()
                };
                runner
                    .with_ranking(Arc::new(sink))
                    .run_all(
                        stores,
                        |_| Box::new(MirrorToRanking::new(map)),
                        confirmation,
                    )
                    .await?
            }
            Command::Dump { store } => {
                return match runner.dump(store, out).await {
                    Ok(_) => Ok(RunStatus::Success),
                    Err(SweepError::Aborted) => Ok(RunStatus::Aborted),
                    Err(err) => {
                        tracing::error!(store = %store, error = %err, "dump failed");
                        Ok(RunStatus::Failed)
                    }
                };
            }
            Command::LookupUser { username } => {
                let id = users::lookup_user_id(&self.transport, &self.config, username)
                    .await
                    .with_context(|| format!("looking up '{username}'"))?;
                out.write_all(format!("{username}\t{id}\n").as_bytes()).await?;
                return Ok(RunStatus::Success);
            }
        };

        for result in &results {
            out.write_all(summary_line(result).as_bytes()).await?;
        }
        out.flush().await?;
        Ok(RunStatus::from_results(&results))
    }
}

fn summary_line(result: &ScanResult) -> String {
    let c = &result.counts;
    let outcome = match &result.outcome {
        ScanOutcome::Completed => "completed".to_string(),
        ScanOutcome::Failed { reason } => format!("FAILED: {reason}"),
        ScanOutcome::Aborted => "aborted by user".to_string(),
    };
    format!(
        "{} [{}] {outcome}: processed={} updated={} deleted={} forwarded={} skipped={} errors={}\n",
        result.store,
        result.task,
        c.processed,
        c.updated,
        c.deleted,
        c.forwarded,
        c.skipped,
        c.errors,
    )
}
