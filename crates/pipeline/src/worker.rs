//! Queue worker: claims jobs and drives them through their provider.
//!
//! A claimed job moves `ACQUIRED -> DISPATCHED -> terminal`. Every provider
//! call is bounded by `min(request_timeout, time left before expires_at)`,
//! transport failures are retried with exponential back-off while the
//! deadline allows, and the job's deadline always wins: once the next poll
//! could not finish in time the provider work is cancelled and the job is
//! finalized as `timeout`.
//!
//! Terminal log entries are written by the queue together with the terminal
//! state. Audit-only entries (`dispatched`, `provider_responded`) go through
//! the stats cache; a failed write does not stop the job, but the cycle
//! reports it once the job settled.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use photochanger_core::backoff::RetryPolicy;
use photochanger_core::checksum::result_checksum;
use photochanger_core::deadlines::{self, DEFAULT_RESULT_RETENTION_HOURS};
use photochanger_core::ingest::mime_for_path;
use photochanger_core::job_events;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::job::{Job, JobResult};
use photochanger_db::models::processing_log::ProcessingLog;
use photochanger_db::models::status::{FailureReason, ProcessingStatus};
use photochanger_events::JobEvent;
use photochanger_providers::{
    IngestPayload, JobContext, PollStatus, ProviderAdapter, ProviderError, ProviderPayload,
    ProviderResult,
};
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::error::{MediaError, QueueError, StatsError, WorkerError};
use crate::templates::resolve_templates;

/// Default pause between idle queue polls and between provider polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound for a single provider call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default least time a status poll is given after the pause before it.
const DEFAULT_MIN_POLL_BUDGET: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle sleep when the queue is empty, and the pause between status polls.
    pub poll_interval: Duration,
    /// Upper bound for any single provider call.
    pub request_timeout: Duration,
    /// A poll is only started if, after `poll_interval`, at least
    /// `min(request_timeout, min_poll_budget)` remains before the deadline.
    pub min_poll_budget: Duration,
    /// Retry policy for provider transport errors.
    pub retry: RetryPolicy,
    pub result_retention_hours: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_poll_budget: DEFAULT_MIN_POLL_BUDGET,
            retry: RetryPolicy::default(),
            result_retention_hours: DEFAULT_RESULT_RETENTION_HOURS,
        }
    }
}

/// What one worker cycle did.
#[derive(Debug)]
pub enum RunOutcome {
    /// No job was eligible.
    Idle,
    /// The job reached the returned terminal state.
    Finalized(Job),
    /// The job was finalized elsewhere (expiry reaper or admin cancel)
    /// before this worker could.
    Superseded(JobId),
}

impl RunOutcome {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Finalized(job) => Some(job),
            _ => None,
        }
    }
}

/// How provider interaction ended.
enum Settled {
    Succeeded {
        result: ProviderResult,
        latency_ms: i64,
    },
    Failed {
        reason: FailureReason,
        message: String,
        /// Provider work to cancel before finalizing.
        cancel: Option<String>,
    },
    Superseded,
}

impl Settled {
    fn provider_error(err: &ProviderError, cancel: Option<&str>) -> Self {
        Self::Failed {
            reason: FailureReason::ProviderError,
            message: err.to_string(),
            cancel: cancel.map(str::to_string),
        }
    }

    fn deadline(message: &str, cancel: Option<&str>) -> Self {
        Self::Failed {
            reason: FailureReason::Timeout,
            message: message.to_string(),
            cancel: cancel.map(str::to_string),
        }
    }

    fn shutdown(cancel: Option<&str>) -> Self {
        Self::Failed {
            reason: FailureReason::Cancelled,
            message: "worker shutting down".to_string(),
            cancel: cancel.map(str::to_string),
        }
    }
}

/// First failed audit-only write of one job.
#[derive(Default)]
struct AuditTrail {
    failure: Option<StatsError>,
}

impl AuditTrail {
    fn keep(&mut self, err: StatsError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    fn settle(self, outcome: RunOutcome) -> Result<RunOutcome, WorkerError> {
        match self.failure {
            Some(err) => Err(err.into()),
            None => Ok(outcome),
        }
    }
}

pub struct QueueWorker {
    ctx: PipelineContext,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(ctx: PipelineContext, config: WorkerConfig) -> Self {
        Self { ctx, config }
    }

    /// Run until `cancel` is triggered.
    ///
    /// Each iteration claims at most one job and drives it to a terminal
    /// state. An empty queue sleeps `poll_interval`; a failed cycle backs
    /// off with the retry policy's delays.
    pub async fn run(&self, worker_id: usize, cancel: CancellationToken) {
        tracing::info!(worker_id, "Queue worker started");
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = self.ctx.clock.now();
            let pause = match self.run_once_until(now, &cancel).await {
                Ok(RunOutcome::Idle) => {
                    failures = 0;
                    Some(self.config.poll_interval)
                }
                Ok(_) => {
                    failures = 0;
                    None
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::error!(worker_id, error = %e, "Worker cycle failed");
                    Some(self.config.retry.delay_for(failures))
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!(worker_id, "Queue worker stopped");
    }

    /// Claim one job and drive it to completion.
    pub async fn run_once(&self, now: Timestamp) -> Result<RunOutcome, WorkerError> {
        self.run_once_until(now, &CancellationToken::new()).await
    }

    /// Drive an already claimed job to a terminal state.
    pub async fn process_job(&self, job: Job, now: Timestamp) -> Result<RunOutcome, WorkerError> {
        self.process(job, now, &CancellationToken::new()).await
    }

    /// Finalize a job whose deadline passed as `timeout` and cancel any
    /// provider work it started.
    pub async fn handle_timeout(&self, job: Job, now: Timestamp) -> Result<RunOutcome, WorkerError> {
        let reference = job.provider_job_reference.clone();
        let (job_id, slot_id) = (job.id, job.slot_id.clone());

        let finalized = self
            .fail(job, FailureReason::Timeout, "deadline passed before dispatch", now)
            .await?;
        if let Some(reference) = reference {
            self.cancel_for_slot(job_id, &slot_id, &reference).await;
        }
        Ok(match finalized {
            Some(job) => RunOutcome::Finalized(job),
            None => RunOutcome::Superseded(job_id),
        })
    }

    /// Time out every job whose deadline passed before `now`.
    ///
    /// The queue writes one `timeout` log per job; this publishes
    /// `job.timed_out` and cancels provider work for each.
    pub async fn reap_expired(&self, now: Timestamp) -> Result<Vec<Job>, WorkerError> {
        let released = self.ctx.queue.release_expired(now).await?;
        for job in &released {
            tracing::warn!(job_id = %job.id, slot_id = %job.slot_id, "Job deadline passed, timed out");
            self.ctx.stats.invalidate(&job.slot_id);
            if let Some(reference) = &job.provider_job_reference {
                self.cancel_for_slot(job.id, &job.slot_id, reference).await;
            }
            self.publish(job, job_events::EVENT_JOB_TIMED_OUT, now);
        }
        Ok(released)
    }

    /// Administrative cancel of a job that has not finalized yet.
    pub async fn cancel_job(&self, id: JobId, now: Timestamp) -> Result<Job, WorkerError> {
        let job = self
            .ctx
            .queue
            .get_job(id)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        if job.is_finalized {
            return Err(QueueError::AlreadyFinalized(id).into());
        }

        let reference = job.provider_job_reference.clone();
        let slot_id = job.slot_id.clone();
        let cancelled = self
            .fail(job, FailureReason::Cancelled, "cancelled by administrator", now)
            .await?
            .ok_or(QueueError::AlreadyFinalized(id))?;
        if let Some(reference) = reference {
            self.cancel_for_slot(id, &slot_id, &reference).await;
        }
        tracing::info!(job_id = %id, slot_id = %slot_id, "Job cancelled by administrator");
        Ok(cancelled)
    }

    /// Run the expiry reaper until `cancel` is triggered.
    pub async fn run_reaper(&self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Expiry reaper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Expiry reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.reap_expired(self.ctx.clock.now()).await {
                        Ok(released) if !released.is_empty() => {
                            tracing::info!(count = released.len(), "Expired jobs released");
                        }
                        Ok(_) => {
                            tracing::trace!("No expired jobs");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Job lifecycle
    // -----------------------------------------------------------------------

    async fn run_once_until(
        &self,
        now: Timestamp,
        shutdown: &CancellationToken,
    ) -> Result<RunOutcome, WorkerError> {
        let Some(job) = self.ctx.queue.acquire_for_processing(now).await? else {
            return Ok(RunOutcome::Idle);
        };
        tracing::info!(
            job_id = %job.id,
            slot_id = %job.slot_id,
            remaining_ms = job.deadline(now).remaining_ms,
            "Job claimed",
        );
        self.process(job, now, shutdown).await
    }

    async fn process(
        &self,
        job: Job,
        now: Timestamp,
        shutdown: &CancellationToken,
    ) -> Result<RunOutcome, WorkerError> {
        if job.is_expired_at(now) {
            return self.handle_timeout(job, now).await;
        }

        let Some(slot) = self.ctx.slots.find(&job.slot_id).await? else {
            let message = format!("slot '{}' does not exist", job.slot_id);
            return self.settle_failure(job, FailureReason::ValidationError, message).await;
        };

        let adapter = match self.ctx.providers.resolve(&slot.provider_id) {
            Ok(adapter) => adapter,
            Err(e) => {
                return self
                    .settle_failure(job, FailureReason::ProviderError, e.to_string())
                    .await;
            }
        };

        let payload = match self.load_payload(&job).await {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("ingest payload unavailable: {e}");
                return self.settle_failure(job, FailureReason::ProviderError, message).await;
            }
        };

        let templates =
            match resolve_templates(self.ctx.media.as_ref(), &job.slot_id, &slot.settings_json).await {
                Ok(templates) => templates,
                Err(e) => {
                    let message = format!("template media unavailable: {e}");
                    return self.settle_failure(job, FailureReason::ProviderError, message).await;
                }
            };

        let context = JobContext {
            job_id: job.id,
            slot_id: job.slot_id.clone(),
            operation_id: slot.operation_id.clone(),
            settings: slot.settings_json.clone(),
            payload,
            templates,
            expires_at: job.expires_at,
        };
        let prepared = match adapter.prepare_payload(&context) {
            Ok(prepared) => prepared,
            Err(e) => {
                return self
                    .settle_failure(job, FailureReason::ProviderError, e.to_string())
                    .await;
            }
        };

        let mut trail = AuditTrail::default();
        let settled = self
            .drive(&job, adapter.as_ref(), &prepared, &mut trail, shutdown)
            .await;
        let outcome = match settled {
            Settled::Succeeded { result, latency_ms } => {
                self.succeed(job, result, latency_ms, &mut trail).await?
            }
            Settled::Failed {
                reason,
                message,
                cancel,
            } => {
                if let Some(reference) = cancel {
                    self.cancel_with(adapter.as_ref(), job.id, &reference).await;
                }
                self.settle_failure(job, reason, message).await?
            }
            Settled::Superseded => RunOutcome::Superseded(job.id),
        };
        trail.settle(outcome)
    }

    /// Submit the prepared payload and poll until the provider settles.
    async fn drive(
        &self,
        job: &Job,
        adapter: &dyn ProviderAdapter,
        payload: &ProviderPayload,
        trail: &mut AuditTrail,
        shutdown: &CancellationToken,
    ) -> Settled {
        let started = Instant::now();
        let reference = match self.submit(job, adapter, payload, shutdown).await {
            Ok(reference) => reference,
            Err(settled) => return settled,
        };

        let now = self.ctx.clock.now();
        match self
            .ctx
            .queue
            .record_provider_reference(job.id, &reference, now)
            .await
        {
            Ok(()) => {}
            Err(QueueError::AlreadyFinalized(_)) => {
                self.cancel_with(adapter, job.id, &reference).await;
                return Settled::Superseded;
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to record provider reference");
            }
        }

        tracing::info!(
            job_id = %job.id,
            slot_id = %job.slot_id,
            provider_id = %adapter.provider_id(),
            reference = %reference,
            "Job dispatched",
        );
        let log = ProcessingLog::new(job.id, &job.slot_id, ProcessingStatus::Dispatched, now)
            .with_details(serde_json::json!({
                "provider_id": adapter.provider_id().as_str(),
                "reference": reference,
            }));
        self.audit(trail, &log).await;

        self.poll(job, adapter, &reference, started, shutdown).await
    }

    /// `Err` carries the terminal verdict when submission gave up.
    async fn submit(
        &self,
        job: &Job,
        adapter: &dyn ProviderAdapter,
        payload: &ProviderPayload,
        shutdown: &CancellationToken,
    ) -> Result<String, Settled> {
        let mut attempt: u32 = 1;
        loop {
            let Some(budget) = self.call_budget(job) else {
                return Err(Settled::deadline("deadline passed before submit", None));
            };
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return Err(Settled::shutdown(None)),
                res = tokio::time::timeout(budget, adapter.submit_job(payload)) => res,
            };
            let err = match outcome {
                Ok(Ok(reference)) => return Ok(reference),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::transport(format!(
                    "submit timed out after {}ms",
                    budget.as_millis()
                )),
            };

            let delay = self.retry_delay(job, attempt, &err, None)?;
            tracing::warn!(
                job_id = %job.id,
                provider_id = %adapter.provider_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider submit failed, retrying",
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Err(Settled::shutdown(None)),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn poll(
        &self,
        job: &Job,
        adapter: &dyn ProviderAdapter,
        reference: &str,
        started: Instant,
        shutdown: &CancellationToken,
    ) -> Settled {
        let mut failures: u32 = 0;
        let needed = self.config.poll_interval
            + self.config.request_timeout.min(self.config.min_poll_budget);
        loop {
            let now = self.ctx.clock.now();
            if !deadlines::fits_before_deadline(now, job.expires_at, needed) {
                return Settled::deadline("deadline reached while polling", Some(reference));
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Settled::shutdown(Some(reference)),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let Some(budget) = self.call_budget(job) else {
                return Settled::deadline("deadline reached while polling", Some(reference));
            };
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return Settled::shutdown(Some(reference)),
                res = tokio::time::timeout(budget, adapter.poll_status(reference)) => res,
            };

            let err = match outcome {
                Ok(Ok(PollStatus::Succeeded(result))) => {
                    let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                    return Settled::Succeeded { result, latency_ms };
                }
                Ok(Ok(PollStatus::Processing)) => {
                    failures = 0;
                    continue;
                }
                Ok(Ok(PollStatus::ActionRequired(action))) => {
                    tracing::debug!(job_id = %job.id, action = %action, "Provider asked to poll again");
                    failures = 0;
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::transport(format!(
                    "status poll timed out after {}ms",
                    budget.as_millis()
                )),
            };

            failures += 1;
            let delay = match self.retry_delay(job, failures, &err, Some(reference)) {
                Ok(delay) => delay,
                Err(settled) => return settled,
            };
            tracing::warn!(
                job_id = %job.id,
                provider_id = %adapter.provider_id(),
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider poll failed, retrying",
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Settled::shutdown(Some(reference)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Back-off before retrying a failed call, or the verdict if no retry
    /// is allowed. Semantic errors never retry; the deadline beats the
    /// retry budget.
    fn retry_delay(
        &self,
        job: &Job,
        attempt: u32,
        err: &ProviderError,
        reference: Option<&str>,
    ) -> Result<Duration, Settled> {
        if !err.is_retryable() {
            // The provider already gave up on this work.
            return Err(Settled::provider_error(err, None));
        }
        let delay = self.config.retry.delay_for(attempt);
        if !deadlines::fits_before_deadline(self.ctx.clock.now(), job.expires_at, delay) {
            return Err(Settled::deadline("deadline reached during retry back-off", reference));
        }
        if !self.config.retry.allows_another(attempt) {
            return Err(Settled::provider_error(err, reference));
        }
        Ok(delay)
    }

    /// Time allowed for the next provider call, `None` once the deadline passed.
    fn call_budget(&self, job: &Job) -> Option<Duration> {
        let remaining = deadlines::remaining(job.expires_at, self.ctx.clock.now());
        (!remaining.is_zero()).then(|| remaining.min(self.config.request_timeout))
    }

    async fn load_payload(&self, job: &Job) -> Result<Option<IngestPayload>, MediaError> {
        let Some(path) = &job.payload_path else {
            return Ok(None);
        };
        let bytes = self.ctx.media.read(path).await?;
        Ok(Some(IngestPayload {
            path: path.clone(),
            mime_type: mime_for_path(path).to_string(),
            bytes,
        }))
    }

    async fn succeed(
        &self,
        job: Job,
        result: ProviderResult,
        latency_ms: i64,
        trail: &mut AuditTrail,
    ) -> Result<RunOutcome, WorkerError> {
        let finalized_at = self.ctx.clock.now();
        if finalized_at > job.expires_at {
            return self
                .settle_failure(
                    job,
                    FailureReason::Timeout,
                    "result arrived after the deadline".to_string(),
                )
                .await;
        }

        let responded = ProcessingLog::new(
            job.id,
            &job.slot_id,
            ProcessingStatus::ProviderResponded,
            finalized_at,
        )
        .with_latency_ms(latency_ms);
        self.audit(trail, &responded).await;

        let result_expires_at =
            deadlines::result_expires_at(finalized_at, self.config.result_retention_hours)?;
        let size_bytes = i64::try_from(result.bytes.len()).unwrap_or(i64::MAX);
        let checksum = result_checksum(&result.bytes);

        let stored = self
            .ctx
            .media
            .store_result(job.id, &result.bytes, &result.mime_type, result_expires_at)
            .await;
        let (file_path, inline_payload) = match stored {
            Ok(media) => (Some(media.path), None),
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "Result media could not be stored, keeping it inline",
                );
                (None, Some(BASE64.encode(&result.bytes)))
            }
        };

        let (job_id, slot_id) = (job.id, job.slot_id.clone());
        let mut terminal = job;
        terminal.finalize_success(
            JobResult {
                file_path: file_path.clone(),
                inline_payload,
                mime_type: result.mime_type,
                size_bytes,
                checksum,
            },
            finalized_at,
            self.config.result_retention_hours,
        )?;

        let log = ProcessingLog::new(job_id, &slot_id, ProcessingStatus::Succeeded, finalized_at)
            .with_latency_ms(latency_ms)
            .with_details(serde_json::json!({ "size_bytes": size_bytes }));
        match self
            .commit(terminal, &log, job_events::EVENT_JOB_COMPLETED)
            .await?
        {
            Some(job) => Ok(RunOutcome::Finalized(job)),
            None => {
                if let Some(path) = file_path {
                    if let Err(e) = self.ctx.media.remove(&path).await {
                        tracing::warn!(job_id = %job_id, path = %path, error = %e, "Failed to remove superseded result");
                    }
                }
                Ok(RunOutcome::Superseded(job_id))
            }
        }
    }

    async fn settle_failure(
        &self,
        job: Job,
        reason: FailureReason,
        message: String,
    ) -> Result<RunOutcome, WorkerError> {
        let job_id = job.id;
        let now = self.ctx.clock.now();
        Ok(match self.fail(job, reason, &message, now).await? {
            Some(job) => RunOutcome::Finalized(job),
            None => RunOutcome::Superseded(job_id),
        })
    }

    /// Finalize `job` as failed. `None` when it was already finalized.
    async fn fail(
        &self,
        job: Job,
        reason: FailureReason,
        message: &str,
        now: Timestamp,
    ) -> Result<Option<Job>, WorkerError> {
        tracing::warn!(
            job_id = %job.id,
            slot_id = %job.slot_id,
            failure_reason = %reason,
            message = %message,
            "Job failed",
        );
        let log = ProcessingLog::new(job.id, &job.slot_id, reason.log_status(), now)
            .with_message(message);
        let mut terminal = job;
        terminal.finalize_failure(reason, now);
        self.commit(terminal, &log, reason.event_type()).await
    }

    /// Persist a terminal state together with its log, then publish its
    /// event.
    ///
    /// Returns `None` without logging if another party finalized first.
    async fn commit(
        &self,
        job: Job,
        log: &ProcessingLog,
        event_type: &str,
    ) -> Result<Option<Job>, WorkerError> {
        match self.ctx.queue.mark_finalized(&job, log).await {
            Ok(stored) => {
                self.ctx.stats.invalidate(&stored.slot_id);
                self.publish(&stored, event_type, log.occurred_at);
                tracing::info!(
                    job_id = %stored.id,
                    slot_id = %stored.slot_id,
                    outcome = %event_type,
                    "Job finalized",
                );
                Ok(Some(stored))
            }
            Err(QueueError::AlreadyFinalized(id)) => {
                tracing::info!(job_id = %id, "Job already finalized elsewhere");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    async fn audit(&self, trail: &mut AuditTrail, log: &ProcessingLog) {
        if let Err(e) = self.ctx.stats.record_event(log).await {
            tracing::error!(
                job_id = %log.job_id,
                slot_id = %log.slot_id,
                status = %log.status,
                error = %e,
                "Failed to record processing log",
            );
            trail.keep(e);
        }
    }

    fn publish(&self, job: &Job, event_type: &str, at: Timestamp) {
        self.ctx.events.publish(
            JobEvent::new(event_type)
                .for_job(job.id, &job.slot_id)
                .with_payload(serde_json::json!({
                    "failure_reason": job.failure_reason,
                    "expires_at": job.expires_at,
                }))
                .at(at),
        );
    }

    /// Best-effort cancel through the slot's provider.
    async fn cancel_for_slot(&self, job_id: JobId, slot_id: &str, reference: &str) {
        let adapter = match self.ctx.slots.find(slot_id).await {
            Ok(Some(slot)) => self.ctx.providers.resolve(&slot.provider_id).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(job_id = %job_id, slot_id = %slot_id, error = %e, "Slot lookup failed during cancel");
                None
            }
        };
        let Some(adapter) = adapter else {
            tracing::warn!(job_id = %job_id, slot_id = %slot_id, "No provider to cancel work with");
            return;
        };
        self.cancel_with(adapter.as_ref(), job_id, reference).await;
    }

    async fn cancel_with(&self, adapter: &dyn ProviderAdapter, job_id: JobId, reference: &str) {
        let provider_id = adapter.provider_id();
        match tokio::time::timeout(self.config.request_timeout, adapter.cancel(reference)).await {
            Ok(Ok(())) => {
                tracing::debug!(job_id = %job_id, provider_id = %provider_id, reference = %reference, "Provider work cancelled");
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, provider_id = %provider_id, error = %e, "Provider cancel failed");
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, provider_id = %provider_id, "Provider cancel timed out");
            }
        }
    }
}
