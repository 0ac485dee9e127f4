#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use photochanger_core::backoff::RetryPolicy;
use photochanger_core::clock::{Clock, ManualClock};
use photochanger_core::deadlines::DeadlinePolicy;
use photochanger_core::types::Timestamp;
use photochanger_db::models::job::Job;
use photochanger_db::models::processing_log::ProcessingLog;
use photochanger_db::models::slot::Slot;
use photochanger_events::EventBus;
use photochanger_pipeline::{
    JobQueue, MediaStore, MemoryJobQueue, MemoryMediaStore, MemoryStatsStore, PipelineContext,
    QueueWorker, StaticSlotDirectory, StatsCache, StatsCacheConfig, WorkerConfig,
};
use photochanger_providers::mock::ScriptedProvider;
use photochanger_providers::{ProviderId, ProviderRegistry};

pub const SLOT: &str = "slot-001";
/// Sync timeout of harness jobs unless a test picks another.
pub const SYNC_SECS: u32 = 30;
pub const INGEST_BYTES: &[u8] = b"\x89PNG ingest";

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn slot(id: &str, provider: &str) -> Slot {
    Slot::new(
        id,
        provider,
        "image_edit",
        serde_json::json!({ "prompt": "Turn the photo into a watercolor" }),
        t0(),
    )
}

/// Millisecond-scale timings so real sleeps stay short; deadlines are
/// driven by the manual clock.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(1),
        request_timeout: Duration::from_secs(1),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        },
        result_retention_hours: 72,
        min_poll_budget: Duration::from_millis(500),
    }
}

/// In-memory pipeline with one Gemini-backed slot.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub queue: Arc<MemoryJobQueue>,
    pub media: Arc<MemoryMediaStore>,
    pub stats_store: Arc<MemoryStatsStore>,
    pub stats: Arc<StatsCache>,
    pub events: Arc<EventBus>,
    pub slots: Arc<StaticSlotDirectory>,
    pub provider: Arc<ScriptedProvider>,
    pub deadlines: DeadlinePolicy,
    pub ctx: PipelineContext,
}

impl Harness {
    pub fn new(build: impl FnOnce(Arc<ManualClock>) -> ScriptedProvider) -> Self {
        Self::build(10, SYNC_SECS, build)
    }

    pub fn with_capacity(
        max_in_flight: usize,
        build: impl FnOnce(Arc<ManualClock>) -> ScriptedProvider,
    ) -> Self {
        Self::build(max_in_flight, SYNC_SECS, build)
    }

    pub fn with_sync_timeout(
        sync_secs: u32,
        build: impl FnOnce(Arc<ManualClock>) -> ScriptedProvider,
    ) -> Self {
        Self::build(10, sync_secs, build)
    }

    fn build(
        max_in_flight: usize,
        sync_secs: u32,
        build: impl FnOnce(Arc<ManualClock>) -> ScriptedProvider,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let provider = Arc::new(build(clock.clone()));

        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());

        let deadlines = DeadlinePolicy::new(sync_secs);
        let queue = Arc::new(MemoryJobQueue::new(max_in_flight).with_deadlines(deadlines));
        let media = Arc::new(MemoryMediaStore::new(clock.clone()));
        let stats_store = Arc::new(MemoryStatsStore::with_jobs(queue.clone()));
        let stats = Arc::new(StatsCache::new(
            stats_store.clone(),
            clock.clone(),
            StatsCacheConfig {
                write_retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        ));
        let events = Arc::new(EventBus::default());
        let slots = Arc::new(StaticSlotDirectory::new([slot(SLOT, "gemini")]));

        let ctx = PipelineContext {
            queue: queue.clone(),
            slots: slots.clone(),
            providers: Arc::new(registry),
            media: media.clone(),
            stats: stats.clone(),
            events: events.clone(),
            clock: clock.clone(),
        };

        Self {
            clock,
            queue,
            media,
            stats_store,
            stats,
            events,
            slots,
            provider,
            deadlines,
            ctx,
        }
    }

    /// Swap the media store the pipeline sees.
    pub fn with_media(mut self, media: Arc<dyn MediaStore>) -> Self {
        self.ctx.media = media;
        self
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(self.ctx.clone(), fast_worker_config())
    }

    /// Swap the stats cache the pipeline sees.
    pub fn with_stats(mut self, stats: Arc<StatsCache>) -> Self {
        self.ctx.stats = stats;
        self
    }

    /// Swap the queue the pipeline sees.
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.ctx.queue = queue;
        self
    }

    /// Store an ingest payload and enqueue a job for `slot_id` created now.
    pub async fn enqueue(&self, slot_id: &str) -> Job {
        let now = self.clock.now();
        let expires_at = self.deadlines.expires_at(now).unwrap();
        let mut job = Job::new_pending(slot_id, None, now, expires_at);
        let payload = self
            .media
            .store_payload(job.id, INGEST_BYTES, "image/png", expires_at)
            .await
            .unwrap();
        job.payload_path = Some(payload.path);
        self.queue.enqueue(job).await.unwrap()
    }

    pub fn logs_for(&self, job: &Job) -> Vec<ProcessingLog> {
        self.stats_store
            .logs()
            .into_iter()
            .filter(|log| log.job_id == job.id)
            .collect()
    }
}

pub fn gemini() -> ScriptedProvider {
    ScriptedProvider::new(ProviderId::Gemini)
}
