mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Duration;
use photochanger_core::checksum::result_checksum;
use photochanger_core::clock::Clock;
use photochanger_core::job_events;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_core::stats::{RecentResult, StatsMetric, StatsScope, StatsWindow};
use photochanger_db::models::job::{Job, JobListQuery};
use photochanger_db::models::media_object::MediaObject;
use photochanger_db::models::processing_log::ProcessingLog;
use photochanger_db::models::status::{FailureReason, ProcessingStatus};
use photochanger_events::JobEvent;
use photochanger_pipeline::{
    JobQueue, MediaError, MediaStore, MemoryJobQueue, MemoryMediaStore, QueueError, RunOutcome,
    StatsCache, StatsCacheConfig, StatsError, StatsStore, WorkerError,
};
use photochanger_providers::mock::Step;
use photochanger_providers::ProviderError;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{gemini, slot, t0, Harness, SLOT};

const RESULT_BYTES: &[u8] = b"result-image";

fn finalized(outcome: RunOutcome) -> Job {
    match outcome {
        RunOutcome::Finalized(job) => job,
        other => panic!("expected a finalized job, got {other:?}"),
    }
}

fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn terminal_statuses(harness: &Harness, job: &Job) -> Vec<ProcessingStatus> {
    harness
        .logs_for(job)
        .into_iter()
        .map(|log| log.status)
        .filter(|status| {
            !matches!(
                status,
                ProcessingStatus::Received
                    | ProcessingStatus::Dispatched
                    | ProcessingStatus::ProviderResponded
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_before_deadline_keeps_result_for_retention_period() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(10))
            .with_polls(vec![Step::succeed(RESULT_BYTES, "image/png")])
    });
    let mut events = harness.events.subscribe();
    let job = harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());

    assert_eq!(done.id, job.id);
    assert!(done.is_succeeded());
    assert_eq!(done.finalized_at, Some(t0() + Duration::seconds(10)));
    assert_eq!(
        done.result_expires_at,
        Some(t0() + Duration::seconds(10) + Duration::hours(72))
    );
    assert_eq!(done.result_checksum.as_deref(), Some(result_checksum(RESULT_BYTES).as_str()));
    assert_eq!(done.result_size_bytes, Some(RESULT_BYTES.len() as i64));

    let path = done.result_file_path.clone().unwrap();
    assert!(path.starts_with(&format!("results/{}/", job.id)));
    assert!(harness.media.contains(&path));

    let statuses: Vec<_> = harness.logs_for(&job).iter().map(|l| l.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProcessingStatus::Received,
            ProcessingStatus::Dispatched,
            ProcessingStatus::ProviderResponded,
            ProcessingStatus::Succeeded,
        ]
    );

    let terminal: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| e.is_terminal_for(job.id))
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].event_type, job_events::EVENT_JOB_COMPLETED);
}

#[tokio::test]
async fn empty_queue_is_idle() {
    let harness = Harness::new(|_| gemini());
    assert_matches!(harness.worker().run_once(t0()).await, Ok(RunOutcome::Idle));
}

#[tokio::test]
async fn action_required_keeps_polling() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(1))
            .with_polls(vec![
                Step::ActionRequired,
                Step::ActionRequired,
                Step::succeed(RESULT_BYTES, "image/png"),
            ])
    });
    harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert!(done.is_succeeded());
    assert_eq!(harness.provider.poll_calls(), 3);
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deadline_stops_polling_and_cancels_provider_work() {
    let harness = Harness::new(|clock| gemini().advancing(clock, Duration::seconds(10)));
    let mut events = harness.events.subscribe();
    let job = harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());

    assert_eq!(done.failure_reason, Some(FailureReason::Timeout));
    assert!(done.result_file_path.is_none());
    assert!(done.result_inline_payload.is_none());
    assert!(done.result_expires_at.is_none());
    assert_eq!(harness.provider.poll_calls(), 3);
    assert_eq!(harness.provider.cancelled(), vec!["gemini-ref-1".to_string()]);
    assert_eq!(terminal_statuses(&harness, &job), vec![ProcessingStatus::Timeout]);

    let kinds: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| e.is_terminal_for(job.id))
        .map(|e| e.event_type)
        .collect();
    assert_eq!(kinds, vec![job_events::EVENT_JOB_TIMED_OUT.to_string()]);
}

#[tokio::test]
async fn claimed_job_at_its_deadline_is_timed_out_without_dispatch() {
    let harness = Harness::new(|_| gemini());
    let job = harness.enqueue(SLOT).await;

    let done = finalized(
        harness
            .worker()
            .run_once(t0() + Duration::seconds(30))
            .await
            .unwrap(),
    );

    assert_eq!(done.id, job.id);
    assert_eq!(done.failure_reason, Some(FailureReason::Timeout));
    assert_eq!(harness.provider.submit_calls(), 0);
    assert!(harness.provider.cancelled().is_empty());
}

#[tokio::test]
async fn no_poll_is_started_without_room_for_its_call() {
    // The first poll leaves 300ms: less than the poll interval plus the
    // minimum poll budget, so the job times out instead of polling again.
    let harness = Harness::new(|clock| gemini().advancing(clock, Duration::milliseconds(29_700)));
    let job = harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());

    assert_eq!(done.failure_reason, Some(FailureReason::Timeout));
    assert_eq!(harness.provider.poll_calls(), 1);
    assert_eq!(harness.provider.cancelled(), vec!["gemini-ref-1".to_string()]);
    assert_eq!(terminal_statuses(&harness, &job), vec![ProcessingStatus::Timeout]);
}

#[tokio::test]
async fn reaper_times_out_overdue_jobs_and_cancels_their_work() {
    let harness = Harness::new(|_| gemini());
    let mut events = harness.events.subscribe();
    let job = harness.enqueue(SLOT).await;
    harness
        .queue
        .record_provider_reference(job.id, "gemini-ref-9", t0())
        .await
        .unwrap();

    let worker = harness.worker();
    let released = worker.reap_expired(t0() + Duration::seconds(45)).await.unwrap();

    assert_eq!(released.len(), 1);
    assert_eq!(released[0].failure_reason, Some(FailureReason::Timeout));
    assert!(released[0].result_file_path.is_none());
    assert_eq!(harness.provider.cancelled(), vec!["gemini-ref-9".to_string()]);
    assert_eq!(terminal_statuses(&harness, &job), vec![ProcessingStatus::Timeout]);
    assert!(drain(&mut events)
        .iter()
        .any(|e| e.is_terminal_for(job.id) && e.event_type == job_events::EVENT_JOB_TIMED_OUT));

    // A second sweep finds nothing left.
    assert!(worker
        .reap_expired(t0() + Duration::seconds(46))
        .await
        .unwrap()
        .is_empty());
}

// ---------------------------------------------------------------------------
// Provider errors and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transport_poll_errors_are_retried() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(1))
            .with_polls(vec![
                Step::transport(),
                Step::transport(),
                Step::succeed(RESULT_BYTES, "image/png"),
            ])
    });
    harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert!(done.is_succeeded());
    assert_eq!(harness.provider.poll_calls(), 3);
}

#[tokio::test]
async fn exhausted_transport_retries_fail_with_provider_error() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(1))
            .with_polls(vec![Step::transport(), Step::transport(), Step::transport()])
    });
    let job = harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert_eq!(done.failure_reason, Some(FailureReason::ProviderError));
    assert_eq!(harness.provider.poll_calls(), 3);
    assert_eq!(harness.provider.cancelled(), vec!["gemini-ref-1".to_string()]);
    assert_eq!(
        terminal_statuses(&harness, &job),
        vec![ProcessingStatus::ProviderError]
    );
}

#[tokio::test]
async fn semantic_poll_error_is_not_retried() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(1))
            .with_polls(vec![Step::semantic("SAFETY")])
    });
    let job = harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert_eq!(done.failure_reason, Some(FailureReason::ProviderError));
    assert_eq!(harness.provider.poll_calls(), 1);

    let log = harness
        .logs_for(&job)
        .into_iter()
        .find(|l| l.status == ProcessingStatus::ProviderError)
        .unwrap();
    assert!(log.message.unwrap().contains("SAFETY"));
}

#[tokio::test]
async fn submit_transport_error_is_retried() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(1))
            .with_submits(vec![Err(ProviderError::transport("connection refused"))])
            .with_polls(vec![Step::succeed(RESULT_BYTES, "image/png")])
    });
    let job = harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert!(done.is_succeeded());
    assert_eq!(harness.provider.submit_calls(), 2);

    let stored = harness.queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.provider_job_reference.as_deref(), Some("gemini-ref-2"));
}

#[tokio::test]
async fn semantic_submit_error_fails_without_polling() {
    let harness = Harness::new(|_| {
        gemini().with_submits(vec![Err(ProviderError::semantic(
            "INVALID_ARGUMENT",
            "image too large",
        ))])
    });
    harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert_eq!(done.failure_reason, Some(FailureReason::ProviderError));
    assert_eq!(harness.provider.submit_calls(), 1);
    assert_eq!(harness.provider.poll_calls(), 0);
}

#[tokio::test]
async fn prepare_failure_is_a_provider_error() {
    let harness = Harness::new(|_| {
        gemini().failing_prepare(ProviderError::semantic("missing_prompt", "no prompt"))
    });
    harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert_eq!(done.failure_reason, Some(FailureReason::ProviderError));
    assert_eq!(harness.provider.submit_calls(), 0);
}

// ---------------------------------------------------------------------------
// Slot resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_slot_is_a_validation_error() {
    let harness = Harness::new(|_| gemini());
    let job = harness.enqueue("slot-404").await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert_eq!(done.failure_reason, Some(FailureReason::ValidationError));
    assert_eq!(terminal_statuses(&harness, &job), vec![ProcessingStatus::Failed]);
}

#[tokio::test]
async fn unknown_or_unregistered_provider_is_a_provider_error() {
    let harness = Harness::new(|_| gemini());
    harness.slots.insert(slot("slot-002", "dall-e"));
    harness.slots.insert(slot("slot-003", "turbotext"));
    harness.enqueue("slot-002").await;
    harness.clock.advance(Duration::milliseconds(1));
    harness.enqueue("slot-003").await;

    let worker = harness.worker();
    for _ in 0..2 {
        let done = finalized(worker.run_once(harness.clock.now()).await.unwrap());
        assert_eq!(done.failure_reason, Some(FailureReason::ProviderError));
    }
    assert_eq!(harness.provider.submit_calls(), 0);
}

// ---------------------------------------------------------------------------
// Result storage
// ---------------------------------------------------------------------------

/// Delegates to a memory store but refuses results.
struct NoResultStorage(Arc<MemoryMediaStore>);

#[async_trait]
impl MediaStore for NoResultStorage {
    async fn store_payload(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        self.0.store_payload(job_id, bytes, mime, expires_at).await
    }

    async fn store_result(
        &self,
        _job_id: JobId,
        _bytes: &[u8],
        _mime: &str,
        _expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        Err(MediaError::Io(std::io::Error::other("disk full")))
    }

    async fn store_template(
        &self,
        slot_id: &str,
        kind: Option<&str>,
        bytes: &[u8],
        mime: &str,
    ) -> Result<MediaObject, MediaError> {
        self.0.store_template(slot_id, kind, bytes, mime).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        self.0.read(path).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError> {
        self.0.find(id).await
    }

    async fn find_template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError> {
        self.0.find_template(slot_id, kind).await
    }

    async fn remove(&self, path: &str) -> Result<(), MediaError> {
        self.0.remove(path).await
    }

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError> {
        self.0.expired(now).await
    }
}

#[tokio::test]
async fn result_is_kept_inline_when_media_storage_fails() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(2))
            .with_polls(vec![Step::succeed(RESULT_BYTES, "image/webp")])
    });
    let media = Arc::new(NoResultStorage(harness.media.clone()));
    let harness = harness.with_media(media);
    harness.enqueue(SLOT).await;

    let done = finalized(harness.worker().run_once(t0()).await.unwrap());
    assert!(done.is_succeeded());
    assert!(done.result_file_path.is_none());
    assert_eq!(
        done.result_inline_payload.as_deref(),
        Some(BASE64.encode(RESULT_BYTES).as_str())
    );
    assert_eq!(done.result_mime_type.as_deref(), Some("image/webp"));
    assert_eq!(done.result_checksum.as_deref(), Some(result_checksum(RESULT_BYTES).as_str()));
}

/// Finalizes the job as cancelled while its result is being stored,
/// standing in for an administrator who wins the race.
struct CancelOnStore {
    inner: Arc<MemoryMediaStore>,
    queue: Arc<MemoryJobQueue>,
}

#[async_trait]
impl MediaStore for CancelOnStore {
    async fn store_payload(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        self.inner.store_payload(job_id, bytes, mime, expires_at).await
    }

    async fn store_result(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        let mut job = self.queue.get_job(job_id).await.unwrap().unwrap();
        job.finalize_failure(FailureReason::Cancelled, t0());
        let log = ProcessingLog::new(job.id, &job.slot_id, ProcessingStatus::Cancelled, t0());
        self.queue.mark_finalized(&job, &log).await.unwrap();
        self.inner.store_result(job_id, bytes, mime, expires_at).await
    }

    async fn store_template(
        &self,
        slot_id: &str,
        kind: Option<&str>,
        bytes: &[u8],
        mime: &str,
    ) -> Result<MediaObject, MediaError> {
        self.inner.store_template(slot_id, kind, bytes, mime).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        self.inner.read(path).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError> {
        self.inner.find(id).await
    }

    async fn find_template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError> {
        self.inner.find_template(slot_id, kind).await
    }

    async fn remove(&self, path: &str) -> Result<(), MediaError> {
        self.inner.remove(path).await
    }

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError> {
        self.inner.expired(now).await
    }
}

#[tokio::test]
async fn superseded_success_removes_its_result_and_logs_no_terminal_entry() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(2))
            .with_polls(vec![Step::succeed(RESULT_BYTES, "image/png")])
    });
    let media = Arc::new(CancelOnStore {
        inner: harness.media.clone(),
        queue: harness.queue.clone(),
    });
    let harness = harness.with_media(media);
    let job = harness.enqueue(SLOT).await;

    let outcome = harness.worker().run_once(t0()).await.unwrap();
    assert_matches!(outcome, RunOutcome::Superseded(id) if id == job.id);

    // Only the ingest payload is left in storage.
    assert_eq!(harness.media.len(), 1);
    let stored = harness.queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_reason, Some(FailureReason::Cancelled));
    assert!(terminal_statuses(&harness, &job).is_empty());
}

// ---------------------------------------------------------------------------
// Audit persistence
// ---------------------------------------------------------------------------

/// Stats store whose writes always fail.
struct UnavailableStats;

#[async_trait]
impl StatsStore for UnavailableStats {
    async fn record(&self, _log: &ProcessingLog) -> Result<(), StatsError> {
        Err(StatsError::Store("connection refused".into()))
    }

    async fn load_metrics(
        &self,
        _scope: &StatsScope,
        _window: StatsWindow,
        _since: Timestamp,
    ) -> Result<Vec<StatsMetric>, StatsError> {
        Ok(Vec::new())
    }

    async fn recent_results(
        &self,
        _slot_id: &str,
        _since: Timestamp,
        _limit: usize,
    ) -> Result<Vec<RecentResult>, StatsError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn lost_audit_entries_fail_the_cycle_but_keep_the_terminal_log() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(2))
            .with_polls(vec![Step::succeed(RESULT_BYTES, "image/png")])
    });
    let stats = Arc::new(StatsCache::new(
        Arc::new(UnavailableStats),
        harness.clock.clone(),
        StatsCacheConfig {
            write_retry_delay: StdDuration::from_millis(1),
            ..Default::default()
        },
    ));
    let harness = harness.with_stats(stats);
    let job = harness.enqueue(SLOT).await;

    assert_matches!(
        harness.worker().run_once(t0()).await,
        Err(WorkerError::Stats(StatsError::Store(_)))
    );

    // The terminal entry is written with the state change, not through stats.
    let stored = harness.queue.get_job(job.id).await.unwrap().unwrap();
    assert!(stored.is_succeeded());
    let statuses: Vec<_> = harness.logs_for(&job).iter().map(|l| l.status).collect();
    assert_eq!(
        statuses,
        vec![ProcessingStatus::Received, ProcessingStatus::Succeeded]
    );
}

/// Delegates to a memory queue but cannot persist terminal states.
struct NoFinalize(Arc<MemoryJobQueue>);

#[async_trait]
impl JobQueue for NoFinalize {
    async fn enqueue(&self, job: Job) -> Result<Job, QueueError> {
        self.0.enqueue(job).await
    }

    async fn acquire_for_processing(&self, now: Timestamp) -> Result<Option<Job>, QueueError> {
        self.0.acquire_for_processing(now).await
    }

    async fn mark_finalized(&self, _job: &Job, _log: &ProcessingLog) -> Result<Job, QueueError> {
        Err(QueueError::Unavailable("connection reset".into()))
    }

    async fn release_expired(&self, now: Timestamp) -> Result<Vec<Job>, QueueError> {
        self.0.release_expired(now).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        self.0.get_job(id).await
    }

    async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<Job>, QueueError> {
        self.0.list_jobs(query).await
    }

    async fn in_flight(&self, now: Timestamp) -> Result<i64, QueueError> {
        self.0.in_flight(now).await
    }

    async fn record_provider_reference(
        &self,
        id: JobId,
        reference: &str,
        now: Timestamp,
    ) -> Result<(), QueueError> {
        self.0.record_provider_reference(id, reference, now).await
    }

    async fn purge_expired_results(&self, now: Timestamp) -> Result<Vec<String>, QueueError> {
        self.0.purge_expired_results(now).await
    }
}

#[tokio::test]
async fn failed_finalize_leaves_no_terminal_log_until_the_reaper_runs() {
    let harness = Harness::new(|clock| {
        gemini()
            .advancing(clock, Duration::seconds(2))
            .with_polls(vec![Step::succeed(RESULT_BYTES, "image/png")])
    });
    let queue = Arc::new(NoFinalize(harness.queue.clone()));
    let harness = harness.with_queue(queue);
    let job = harness.enqueue(SLOT).await;

    assert_matches!(
        harness.worker().run_once(t0()).await,
        Err(WorkerError::Queue(QueueError::Unavailable(_)))
    );
    let stored = harness.queue.get_job(job.id).await.unwrap().unwrap();
    assert!(!stored.is_finalized);
    assert!(terminal_statuses(&harness, &job).is_empty());

    let released = harness.queue.release_expired(t0() + Duration::seconds(31)).await.unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(terminal_statuses(&harness, &job), vec![ProcessingStatus::Timeout]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_cancel_wins_over_a_late_dispatch() {
    let harness = Harness::new(|_| gemini());
    let job = harness.enqueue(SLOT).await;
    let claimed = harness.queue.acquire_for_processing(t0()).await.unwrap().unwrap();

    let worker = harness.worker();
    let cancelled = worker.cancel_job(job.id, t0()).await.unwrap();
    assert_eq!(cancelled.failure_reason, Some(FailureReason::Cancelled));

    let outcome = worker.process_job(claimed, t0()).await.unwrap();
    assert_matches!(outcome, RunOutcome::Superseded(id) if id == job.id);
    assert_eq!(harness.provider.cancelled(), vec!["gemini-ref-1".to_string()]);
    assert_eq!(
        terminal_statuses(&harness, &job),
        vec![ProcessingStatus::Cancelled]
    );
}

#[tokio::test]
async fn finalized_job_cannot_be_cancelled() {
    let harness = Harness::new(|_| gemini());
    let job = harness.enqueue(SLOT).await;
    let worker = harness.worker();
    worker.reap_expired(t0() + Duration::seconds(31)).await.unwrap();

    assert_matches!(
        worker.cancel_job(job.id, t0() + Duration::seconds(32)).await,
        Err(WorkerError::Queue(QueueError::AlreadyFinalized(_)))
    );
    assert_matches!(
        worker.cancel_job(JobId::now_v7(), t0()).await,
        Err(WorkerError::Queue(QueueError::NotFound(_)))
    );
}

#[tokio::test]
async fn shutdown_cancels_the_job_in_flight() {
    let harness = Harness::new(|_| gemini());
    let job = harness.enqueue(SLOT).await;

    let token = CancellationToken::new();
    let worker = harness.worker();
    let handle = {
        let token = token.clone();
        tokio::spawn(async move { worker.run(1, token).await })
    };

    for _ in 0..1_000 {
        if harness.provider.poll_calls() > 0 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(1)).await;
    }
    assert!(harness.provider.poll_calls() > 0, "worker never started polling");

    token.cancel();
    handle.await.unwrap();

    let stored = harness.queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_reason, Some(FailureReason::Cancelled));
    assert_eq!(harness.provider.cancelled(), vec!["gemini-ref-1".to_string()]);
}
