//! Periodic removal of expired job results and temporary media.
//!
//! Each sweep first clears result artifacts whose retention ended (and
//! deletes their files), then removes every expired media object still in
//! the index. A failure on one object is logged and the sweep continues.

use std::sync::Arc;
use std::time::Duration;

use photochanger_core::clock::Clock;
use photochanger_core::types::Timestamp;
use tokio_util::sync::CancellationToken;

use crate::error::CleanupError;
use crate::media::MediaStore;
use crate::queue::JobQueue;

/// Default interval between sweeps (5 minutes).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Jobs whose result fields were cleared.
    pub results_purged: usize,
    /// Media objects removed from storage.
    pub media_removed: usize,
    /// Objects that could not be removed.
    pub failures: usize,
}

pub struct CleanupSweeper {
    queue: Arc<dyn JobQueue>,
    media: Arc<dyn MediaStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl CleanupSweeper {
    pub fn new(queue: Arc<dyn JobQueue>, media: Arc<dyn MediaStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            media,
            clock,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one sweep as of `now`.
    pub async fn run_once(&self, now: Timestamp) -> Result<CleanupReport, CleanupError> {
        let mut report = CleanupReport::default();

        let purged_paths = self.queue.purge_expired_results(now).await?;
        report.results_purged = purged_paths.len();
        for path in &purged_paths {
            self.remove(path, &mut report).await;
        }

        let expired = self.media.expired(now).await?;
        for media in &expired {
            if purged_paths.contains(&media.path) {
                continue;
            }
            self.remove(&media.path, &mut report).await;
        }

        Ok(report)
    }

    /// Sweep every `interval` until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Media cleanup started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Media cleanup stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once(self.clock.now()).await {
                        Ok(report) if report.results_purged > 0 || report.media_removed > 0 => {
                            tracing::info!(
                                results_purged = report.results_purged,
                                media_removed = report.media_removed,
                                failures = report.failures,
                                "Media cleanup: removed expired objects",
                            );
                        }
                        Ok(report) => {
                            tracing::debug!(failures = report.failures, "Media cleanup: nothing to remove");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Media cleanup failed");
                        }
                    }
                }
            }
        }
    }

    async fn remove(&self, path: &str, report: &mut CleanupReport) {
        match self.media.remove(path).await {
            Ok(()) => report.media_removed += 1,
            Err(e) => {
                report.failures += 1;
                tracing::warn!(path = %path, error = %e, "Failed to remove expired media");
            }
        }
    }
}
