//! Inter-call pacing and rate-limit backoff.
//!
//! The remote enforces per-key and per-page rate limits, so the scan is
//! throttled at three points: a short jittered pause after every per-key
//! call, a longer pause after every page, and a fixed pause after a 429
//! before the page is restarted.

use std::time::Duration;

use rand::Rng;

use crate::abort::AbortSignal;
use crate::config::PacingConfig;
use crate::error::SweepError;

/// Applies [`PacingConfig`] delays. Every pause is interruptible.
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
    abort: AbortSignal,
}

impl Pacer {
    #[must_use]
    pub fn new(config: PacingConfig, abort: AbortSignal) -> Self {
        Self { config, abort }
    }

    /// Pauses after a per-key call (`after_call`) or after a full page.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] if interrupted.
    pub async fn pace(&self, after_call: bool) -> Result<(), SweepError> {
        let delay = if after_call {
            self.key_delay()
        } else {
            self.config.page_pace
        };
        self.pause(delay).await
    }

    /// Jittered pause after a per-key call.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] if interrupted.
    pub async fn pace_after_key(&self) -> Result<(), SweepError> {
        self.pace(true).await
    }

    /// Fixed pause after a full page.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] if interrupted.
    pub async fn pace_after_page(&self) -> Result<(), SweepError> {
        self.pace(false).await
    }

    /// Fixed pause after a rate-limit signal.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] if interrupted.
    pub async fn backoff_pause(&self) -> Result<(), SweepError> {
        self.pause(self.config.rate_limit_backoff).await
    }

    #[must_use]
    pub fn backoff_duration(&self) -> Duration {
        self.config.rate_limit_backoff
    }

    /// Per-key delay drawn uniformly from `[key_pace_min, key_pace_max]`.
    fn key_delay(&self) -> Duration {
        let min = self.config.key_pace_min;
        let max = self.config.key_pace_max.max(min);
        if min == max {
            return min;
        }
        #[allow(clippy::cast_possible_truncation)]
        let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    async fn pause(&self, delay: Duration) -> Result<(), SweepError> {
        if delay.is_zero() {
            return self.abort.check();
        }
        self.abort.sleep(delay).await
    }
}
