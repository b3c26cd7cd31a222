//! Cooperative cancellation for scans.
//!
//! An [`AbortController`] owns a `watch` channel; every [`AbortSignal`]
//! cloned from it observes the same flag. Pauses and remote calls race the
//! signal, so an interrupt ends the scan at the next await point with
//! [`SweepError::Aborted`] instead of tearing the process down mid-call.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::SweepError;

/// Owner of the abort flag.
#[derive(Debug)]
pub struct AbortController {
    signal: watch::Sender<bool>,
}

impl AbortController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { signal: tx }
    }

    /// Returns a signal that observes this controller.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.signal.subscribe(),
        }
    }

    /// Raises the abort flag for every signal.
    pub fn trigger(&self) {
        // send_replace stores the value even when no signal is subscribed yet.
        self.signal.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.signal.borrow()
    }

    /// Spawns a task that triggers the controller on Ctrl-C.
    pub fn trigger_on_ctrl_c(self: &std::sync::Arc<Self>) {
        let controller = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, aborting scan");
                controller.trigger();
            }
        });
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of an [`AbortController`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns `Err(Aborted)` if the flag is raised.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] once the controller has been triggered.
    pub fn check(&self) -> Result<(), SweepError> {
        if self.is_aborted() {
            Err(SweepError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolves once the flag is raised. Pends forever if the controller is
    /// dropped without triggering.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Runs `fut` unless the signal fires first.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] if the signal fires before `fut`
    /// completes, otherwise whatever `fut` returns.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, SweepError>
    where
        F: Future<Output = Result<T, SweepError>>,
    {
        self.check()?;
        tokio::select! {
            result = fut => result,
            () = self.aborted() => Err(SweepError::Aborted),
        }
    }

    /// Sleeps for `duration` unless the signal fires first.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Aborted`] if the signal fires during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), SweepError> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_not_aborted() {
        let controller = AbortController::new();
        assert!(!controller.is_triggered());
        assert!(!controller.signal().is_aborted());
        assert!(AbortSignal::never().check().is_ok());
    }

    #[test]
    fn trigger_reaches_existing_and_later_signals() {
        let controller = AbortController::new();
        let early = controller.signal();
        controller.trigger();
        assert!(early.is_aborted());
        assert!(controller.signal().is_aborted());
        assert!(matches!(early.check(), Err(SweepError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted() {
        let controller = std::sync::Arc::new(AbortController::new());
        let signal = controller.signal();

        let trigger = std::sync::Arc::clone(&controller);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });

        let err = signal.sleep(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, SweepError::Aborted));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_abort() {
        let signal = AbortSignal::never();
        let start = tokio::time::Instant::now();
        signal.sleep(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn guard_refuses_to_start_after_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        controller.trigger();
        let result: Result<u8, _> = signal.guard(async { Ok(1) }).await;
        assert!(matches!(result, Err(SweepError::Aborted)));
    }
}
