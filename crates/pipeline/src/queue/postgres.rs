//! PostgreSQL-backed queue built on [`JobRepo`].

use async_trait::async_trait;
use photochanger_core::deadlines::DeadlinePolicy;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::job::{Job, JobListQuery};
use photochanger_db::models::processing_log::ProcessingLog;
use photochanger_db::repositories::{Admission, JobRepo};
use photochanger_db::DbPool;

use super::{check_admissible, check_terminal, reconcile_finalized, JobQueue};
use crate::error::QueueError;

pub struct PgJobQueue {
    pool: DbPool,
    max_in_flight: i64,
    deadlines: DeadlinePolicy,
}

impl PgJobQueue {
    pub fn new(pool: DbPool, max_in_flight: usize) -> Self {
        Self {
            pool,
            max_in_flight: i64::try_from(max_in_flight).unwrap_or(i64::MAX),
            deadlines: DeadlinePolicy::default(),
        }
    }

    /// Admit only jobs whose deadline follows `deadlines`.
    pub fn with_deadlines(mut self, deadlines: DeadlinePolicy) -> Self {
        self.deadlines = deadlines;
        self
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: Job) -> Result<Job, QueueError> {
        check_admissible(&job, &self.deadlines)?;
        match JobRepo::enqueue(&self.pool, &job, self.max_in_flight, job.created_at).await? {
            Admission::Accepted(stored) => {
                tracing::debug!(job_id = %stored.id, slot_id = %stored.slot_id, "Job enqueued");
                Ok(stored)
            }
            Admission::Busy { in_flight } => Err(QueueError::Busy {
                in_flight,
                max_in_flight: self.max_in_flight,
            }),
        }
    }

    async fn acquire_for_processing(&self, now: Timestamp) -> Result<Option<Job>, QueueError> {
        Ok(JobRepo::claim_next(&self.pool, now).await?)
    }

    async fn mark_finalized(&self, job: &Job, log: &ProcessingLog) -> Result<Job, QueueError> {
        check_terminal(job, log)?;

        if let Some(stored) = JobRepo::finalize(&self.pool, job, log).await? {
            return Ok(stored);
        }

        // Nothing updated: the row is missing or was finalized by someone else.
        let stored = JobRepo::find_by_id(&self.pool, job.id)
            .await?
            .ok_or(QueueError::NotFound(job.id))?;
        reconcile_finalized(job, stored)
    }

    async fn release_expired(&self, now: Timestamp) -> Result<Vec<Job>, QueueError> {
        Ok(JobRepo::release_expired(&self.pool, now).await?)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<Job>, QueueError> {
        Ok(JobRepo::list(&self.pool, query).await?)
    }

    async fn in_flight(&self, now: Timestamp) -> Result<i64, QueueError> {
        Ok(JobRepo::count_in_flight(&self.pool, now).await?)
    }

    async fn record_provider_reference(
        &self,
        id: JobId,
        reference: &str,
        now: Timestamp,
    ) -> Result<(), QueueError> {
        if JobRepo::set_provider_reference(&self.pool, id, reference, now).await? {
            return Ok(());
        }
        match JobRepo::find_by_id(&self.pool, id).await? {
            Some(_) => Err(QueueError::AlreadyFinalized(id)),
            None => Err(QueueError::NotFound(id)),
        }
    }

    async fn purge_expired_results(&self, now: Timestamp) -> Result<Vec<String>, QueueError> {
        Ok(JobRepo::purge_expired_results(&self.pool, now).await?)
    }
}
