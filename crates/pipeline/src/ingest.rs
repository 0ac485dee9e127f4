//! Admission of uploads into the job queue.
//!
//! [`IngestGateway::submit`] validates an upload, stores it as a temporary
//! payload and enqueues a job whose deadline is `T_sync_response` from now.
//! [`IngestGateway::submit_and_wait`] also waits on the event bus for the
//! job to finalize, answering synchronous callers within that deadline.

use photochanger_core::deadlines::{self, DeadlinePolicy, DEFAULT_SYNC_RESPONSE_SECS};
use photochanger_core::ingest::{normalize_content_type, validate_upload, DEFAULT_MAX_UPLOAD_BYTES};
use photochanger_core::job_events;
use photochanger_core::types::JobId;
use photochanger_db::models::job::Job;
use photochanger_db::models::status::FailureReason;
use photochanger_events::JobEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::context::PipelineContext;
use crate::error::{IngestError, QueueError};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub sync_timeout_sec: u32,
    /// Must equal `sync_timeout_sec`.
    pub public_link_ttl_sec: u32,
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sync_timeout_sec: DEFAULT_SYNC_RESPONSE_SECS,
            public_link_ttl_sec: DEFAULT_SYNC_RESPONSE_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl IngestConfig {
    /// Deadline rule the job queue must enforce for jobs admitted here.
    pub fn deadlines(&self) -> DeadlinePolicy {
        DeadlinePolicy {
            sync_timeout_sec: self.sync_timeout_sec,
            public_link_ttl_sec: self.public_link_ttl_sec,
        }
    }
}

/// An uploaded image.
#[derive(Debug, Clone)]
pub struct Upload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Final answer for a synchronous caller.
#[derive(Debug)]
pub enum IngestOutcome {
    Completed(Job),
    /// Finalized without a result (provider error, validation error,
    /// cancellation).
    Failed(Job),
    /// The deadline passed, whether or not the job is finalized yet.
    TimedOut(Job),
}

impl IngestOutcome {
    pub fn job(&self) -> &Job {
        match self {
            Self::Completed(job) | Self::Failed(job) | Self::TimedOut(job) => job,
        }
    }

    fn classify(job: Job) -> Self {
        match job.failure_reason {
            None if job.is_finalized => Self::Completed(job),
            Some(FailureReason::Timeout) => Self::TimedOut(job),
            Some(_) => Self::Failed(job),
            None => Self::TimedOut(job),
        }
    }
}

pub struct IngestGateway {
    ctx: PipelineContext,
    config: IngestConfig,
}

impl IngestGateway {
    pub fn new(ctx: PipelineContext, config: IngestConfig) -> Self {
        Self { ctx, config }
    }

    /// Validate, store and enqueue an upload for `slot_id`.
    ///
    /// The payload is removed again if the queue refuses the job.
    pub async fn submit(&self, slot_id: &str, upload: Upload) -> Result<Job, IngestError> {
        validate_upload(&upload.content_type, upload.bytes.len(), self.config.max_upload_bytes)?;
        let content_type = normalize_content_type(&upload.content_type);

        if self.ctx.slots.find(slot_id).await?.is_none() {
            return Err(IngestError::SlotNotFound(slot_id.to_string()));
        }

        let now = self.ctx.clock.now();
        let expires_at = self.config.deadlines().expires_at(now)?;
        let mut job = Job::new_pending(slot_id, None, now, expires_at);

        let payload_expires_at =
            deadlines::artifact_expiry(now, expires_at, self.config.public_link_ttl_sec);
        let payload = self
            .ctx
            .media
            .store_payload(job.id, &upload.bytes, &content_type, payload_expires_at)
            .await?;
        job.payload_path = Some(payload.path.clone());

        let job = match self.ctx.queue.enqueue(job).await {
            Ok(job) => job,
            Err(e) => {
                if let Err(remove_err) = self.ctx.media.remove(&payload.path).await {
                    tracing::warn!(
                        path = %payload.path,
                        error = %remove_err,
                        "Failed to remove payload of rejected job",
                    );
                }
                if matches!(e, QueueError::Busy { .. }) {
                    tracing::info!(slot_id = %slot_id, error = %e, "Ingest rejected by admission control");
                } else {
                    tracing::error!(slot_id = %slot_id, error = %e, "Ingest enqueue failed");
                }
                return Err(e.into());
            }
        };

        // The queue logged `received` with the insert.
        self.ctx.stats.invalidate(&job.slot_id);
        self.ctx.events.publish(
            JobEvent::new(job_events::EVENT_JOB_ENQUEUED)
                .for_job(job.id, &job.slot_id)
                .with_payload(serde_json::json!({ "expires_at": job.expires_at }))
                .at(now),
        );
        tracing::info!(
            job_id = %job.id,
            slot_id = %job.slot_id,
            expires_at = %job.expires_at,
            "Job accepted",
        );
        Ok(job)
    }

    /// Submit and wait until the job finalizes or its deadline passes.
    pub async fn submit_and_wait(
        &self,
        slot_id: &str,
        upload: Upload,
    ) -> Result<IngestOutcome, IngestError> {
        // Subscribe first so the terminal event cannot slip past.
        let mut events = self.ctx.events.subscribe();
        let job = self.submit(slot_id, upload).await?;
        let job_id = job.id;

        let remaining = deadlines::remaining(job.expires_at, self.ctx.clock.now());
        let deadline = tokio::time::sleep(remaining);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                received = events.recv() => match received {
                    Ok(event) if event.is_terminal_for(job_id) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(job_id = %job_id, skipped, "Event receiver lagged, checking job");
                        if self.finalized(job_id).await?.is_some() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        let current = self
            .ctx
            .queue
            .get_job(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;
        Ok(IngestOutcome::classify(current))
    }

    async fn finalized(&self, job_id: JobId) -> Result<Option<Job>, IngestError> {
        Ok(self
            .ctx
            .queue
            .get_job(job_id)
            .await?
            .filter(|job| job.is_finalized))
    }
}
