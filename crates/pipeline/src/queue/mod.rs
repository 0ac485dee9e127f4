//! Durable job mailbox with admission control and single-claim semantics.

use async_trait::async_trait;
use photochanger_core::deadlines::DeadlinePolicy;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::job::{Job, JobListQuery};
use photochanger_db::models::processing_log::ProcessingLog;

use crate::error::QueueError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

/// Queue operations shared by the ingest gateway, workers and the admin API.
///
/// A job is *in flight* while it is not finalized and its deadline has not
/// passed. Only in-flight jobs count against admission.
///
/// Admission, finalization and expiry append their processing log entry
/// atomically with the state change: either both are stored or neither is.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Admit `job` unless the in-flight limit is reached.
    ///
    /// Admission is evaluated at `job.created_at`; the check and the insert
    /// are one atomic unit. `job.expires_at` must equal `created_at` plus
    /// the queue's configured synchronous budget. Appends a `received` entry.
    async fn enqueue(&self, job: Job) -> Result<Job, QueueError>;

    /// Claim the oldest pending job whose deadline is not before `now` and
    /// mark it processing. Concurrent callers never receive the same job.
    async fn acquire_for_processing(&self, now: Timestamp) -> Result<Option<Job>, QueueError>;

    /// Persist the terminal state carried by `job` together with its
    /// terminal `log`.
    ///
    /// Re-applying the stored terminal state returns it unchanged and
    /// appends nothing; a different terminal state fails with
    /// [`QueueError::AlreadyFinalized`].
    async fn mark_finalized(&self, job: &Job, log: &ProcessingLog) -> Result<Job, QueueError>;

    /// Finalize every live job whose deadline is before `now` as `timeout`,
    /// append a `timeout` entry for each and return them.
    async fn release_expired(&self, now: Timestamp) -> Result<Vec<Job>, QueueError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Newest first, filtered and paginated by `query`.
    async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<Job>, QueueError>;

    async fn in_flight(&self, now: Timestamp) -> Result<i64, QueueError>;

    /// Remember the provider's reference for a job that is still running.
    async fn record_provider_reference(
        &self,
        id: JobId,
        reference: &str,
        now: Timestamp,
    ) -> Result<(), QueueError>;

    /// Clear result artifacts whose retention ended at or before `now` and
    /// return the file paths they referenced.
    async fn purge_expired_results(&self, now: Timestamp) -> Result<Vec<String>, QueueError>;
}

/// Reject jobs that cannot be admitted as given.
pub(crate) fn check_admissible(job: &Job, deadlines: &DeadlinePolicy) -> Result<(), QueueError> {
    if job.is_finalized {
        return Err(QueueError::Invalid(format!(
            "job {} is already finalized",
            job.id
        )));
    }
    deadlines
        .check(job.created_at, job.expires_at)
        .map_err(|e| QueueError::Invalid(format!("job {}: {e}", job.id)))
}

/// Reject a finalize request whose job is not terminal or whose log
/// describes something else.
pub(crate) fn check_terminal(job: &Job, log: &ProcessingLog) -> Result<(), QueueError> {
    job.validate_terminal()
        .map_err(|e| QueueError::Invalid(e.to_string()))?;
    if log.job_id != job.id || !log.status.is_terminal() {
        return Err(QueueError::Invalid(format!(
            "log {} ({}) is not a terminal entry for job {}",
            log.id, log.status, job.id
        )));
    }
    Ok(())
}

/// Resolve the outcome of finalizing an already-terminal job.
pub(crate) fn reconcile_finalized(requested: &Job, stored: Job) -> Result<Job, QueueError> {
    if stored.is_finalized && stored.same_terminal_state(requested) {
        Ok(stored)
    } else if stored.is_finalized {
        Err(QueueError::AlreadyFinalized(stored.id))
    } else {
        Err(QueueError::Invalid(format!(
            "job {} could not be finalized",
            stored.id
        )))
    }
}
