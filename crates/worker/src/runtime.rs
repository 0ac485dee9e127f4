//! Spawns and stops the long-running pipeline tasks.

use std::sync::Arc;
use std::time::Duration;

use photochanger_pipeline::{CleanupSweeper, PipelineContext, QueueWorker, WorkerConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Task counts and intervals for [`Services::start`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub worker_count: usize,
    pub worker: WorkerConfig,
    pub expiry_sweep_interval: Duration,
    pub cleanup_interval: Duration,
}

/// Handles of the running tasks, all tied to one cancellation token.
pub struct Services {
    cancel: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Services {
    /// Spawn `worker_count` queue workers, the expiry reaper and the media
    /// cleanup sweeper.
    pub fn start(ctx: PipelineContext, settings: &ServiceSettings) -> Self {
        let cancel = CancellationToken::new();
        let worker = Arc::new(QueueWorker::new(ctx.clone(), settings.worker.clone()));
        let mut handles = Vec::with_capacity(settings.worker_count + 2);

        for worker_id in 1..=settings.worker_count {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            handles.push((
                format!("worker-{worker_id}"),
                tokio::spawn(async move { worker.run(worker_id, cancel).await }),
            ));
        }

        {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            let interval = settings.expiry_sweep_interval;
            handles.push((
                "expiry-reaper".to_string(),
                tokio::spawn(async move { worker.run_reaper(interval, cancel).await }),
            ));
        }

        let sweeper = CleanupSweeper::new(ctx.queue.clone(), ctx.media.clone(), ctx.clock.clone())
            .with_interval(settings.cleanup_interval);
        let sweeper_cancel = cancel.clone();
        handles.push((
            "media-cleanup".to_string(),
            tokio::spawn(async move { sweeper.run(sweeper_cancel).await }),
        ));

        tracing::info!(
            workers = settings.worker_count,
            expiry_sweep_ms = settings.expiry_sweep_interval.as_millis() as u64,
            cleanup_secs = settings.cleanup_interval.as_secs(),
            "Pipeline services started",
        );
        Self { cancel, handles }
    }

    /// Cancel all tasks and wait up to `grace` for each to finish.
    ///
    /// Returns the number of tasks that did not stop in time or panicked.
    pub async fn shutdown(self, grace: Duration) -> usize {
        self.cancel.cancel();
        let mut unclean = 0;
        for (name, handle) in self.handles {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "Task stopped"),
                Ok(Err(e)) => {
                    unclean += 1;
                    tracing::error!(task = %name, error = %e, "Task ended abnormally");
                }
                Err(_) => {
                    unclean += 1;
                    tracing::warn!(task = %name, grace_secs = grace.as_secs(), "Task did not stop in time");
                }
            }
        }
        unclean
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use photochanger_core::clock::{Clock, ManualClock};
    use photochanger_db::models::job::Job;
    use photochanger_db::models::slot::Slot;
    use photochanger_db::models::status::FailureReason;
    use photochanger_events::EventBus;
    use photochanger_pipeline::{
        JobQueue, MemoryJobQueue, MemoryMediaStore, MemoryStatsStore, StaticSlotDirectory,
        StatsCache, StatsCacheConfig,
    };
    use photochanger_providers::ProviderRegistry;

    use super::*;

    fn settings() -> ServiceSettings {
        ServiceSettings {
            worker_count: 2,
            worker: WorkerConfig {
                poll_interval: Duration::from_millis(2),
                ..WorkerConfig::default()
            },
            expiry_sweep_interval: Duration::from_millis(2),
            cleanup_interval: Duration::from_millis(5),
        }
    }

    fn context(queue: Arc<MemoryJobQueue>, clock: Arc<ManualClock>) -> PipelineContext {
        PipelineContext {
            queue,
            slots: Arc::new(StaticSlotDirectory::new(Vec::<Slot>::new())),
            providers: Arc::new(ProviderRegistry::new()),
            media: Arc::new(MemoryMediaStore::new(clock.clone())),
            stats: Arc::new(StatsCache::new(
                Arc::new(MemoryStatsStore::new()),
                clock.clone(),
                StatsCacheConfig::default(),
            )),
            events: Arc::new(EventBus::default()),
            clock,
        }
    }

    #[tokio::test]
    async fn services_stop_cleanly_on_shutdown() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let services = Services::start(context(Arc::new(MemoryJobQueue::new(4)), clock), &settings());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(services.shutdown(Duration::from_secs(2)).await, 0);
    }

    #[tokio::test]
    async fn reaper_times_out_overdue_jobs() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let queue = Arc::new(MemoryJobQueue::new(4));
        let job = queue
            .enqueue(Job::new_pending(
                "slot-001",
                None,
                start,
                start + ChronoDuration::seconds(48),
            ))
            .await
            .unwrap();
        // Past the deadline before any worker could claim it.
        clock.advance(ChronoDuration::seconds(60));

        let services = Services::start(context(queue.clone(), clock.clone()), &settings());
        let mut finalized = None;
        for _ in 0..500 {
            let current = queue.get_job(job.id).await.unwrap().unwrap();
            if current.is_finalized {
                finalized = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        services.shutdown(Duration::from_secs(2)).await;

        let finalized = finalized.unwrap();
        assert_eq!(finalized.failure_reason, Some(FailureReason::Timeout));
        assert!(finalized.finalized_at.unwrap() <= clock.now());
    }
}
