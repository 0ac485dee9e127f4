//! In-process queue guarded by a single mutex.
//!
//! Every operation runs inside one critical section, which makes the
//! admission check, the claim and the expiry sweep atomic. Processing log
//! entries for admission and finalization are appended to the queue's
//! [`MemoryJournal`] inside the same section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use photochanger_core::deadlines::DeadlinePolicy;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::job::{Job, JobListQuery};
use photochanger_db::models::processing_log::ProcessingLog;
use photochanger_db::models::status::{FailureReason, JobStatus};

use super::{check_admissible, check_terminal, reconcile_finalized, JobQueue};
use crate::error::QueueError;
use crate::stats::MemoryJournal;

pub struct MemoryJobQueue {
    max_in_flight: i64,
    deadlines: DeadlinePolicy,
    jobs: Mutex<HashMap<JobId, Job>>,
    journal: Arc<MemoryJournal>,
}

impl MemoryJobQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: i64::try_from(max_in_flight).unwrap_or(i64::MAX),
            deadlines: DeadlinePolicy::default(),
            jobs: Mutex::new(HashMap::new()),
            journal: Arc::new(MemoryJournal::new()),
        }
    }

    /// Admit only jobs whose deadline follows `deadlines`.
    pub fn with_deadlines(mut self, deadlines: DeadlinePolicy) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// The log this queue appends its transitions to.
    pub fn journal(&self) -> Arc<MemoryJournal> {
        Arc::clone(&self.journal)
    }

    /// Copy of every stored job, oldest first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn count_in_flight(jobs: &HashMap<JobId, Job>, now: Timestamp) -> i64 {
    jobs.values()
        .filter(|job| !job.is_finalized && job.expires_at > now)
        .count() as i64
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<Job, QueueError> {
        check_admissible(&job, &self.deadlines)?;
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(QueueError::Invalid(format!("job {} already exists", job.id)));
        }
        let in_flight = count_in_flight(&jobs, job.created_at);
        if in_flight >= self.max_in_flight {
            return Err(QueueError::Busy {
                in_flight,
                max_in_flight: self.max_in_flight,
            });
        }
        let mut stored = job;
        stored.status = JobStatus::Pending;
        jobs.insert(stored.id, stored.clone());
        self.journal.append(&ProcessingLog::received(&stored));
        Ok(stored)
    }

    async fn acquire_for_processing(&self, now: Timestamp) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.lock();
        let next = jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Pending && !job.is_finalized && job.expires_at >= now
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|job| job.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.status = JobStatus::Processing;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn mark_finalized(&self, job: &Job, log: &ProcessingLog) -> Result<Job, QueueError> {
        check_terminal(job, log)?;

        let mut jobs = self.lock();
        let stored = jobs.get_mut(&job.id).ok_or(QueueError::NotFound(job.id))?;
        if stored.is_finalized {
            return reconcile_finalized(job, stored.clone());
        }

        stored.is_finalized = true;
        stored.failure_reason = job.failure_reason;
        stored.finalized_at = job.finalized_at;
        stored.updated_at = job.updated_at;
        stored.result_file_path = job.result_file_path.clone();
        stored.result_inline_payload = job.result_inline_payload.clone();
        stored.result_mime_type = job.result_mime_type.clone();
        stored.result_size_bytes = job.result_size_bytes;
        stored.result_checksum = job.result_checksum.clone();
        stored.result_expires_at = job.result_expires_at;
        self.journal.append(log);
        Ok(stored.clone())
    }

    async fn release_expired(&self, now: Timestamp) -> Result<Vec<Job>, QueueError> {
        let mut jobs = self.lock();
        let mut released: Vec<Job> = jobs
            .values_mut()
            .filter(|job| !job.is_finalized && job.expires_at < now)
            .map(|job| {
                job.finalize_failure(FailureReason::Timeout, now);
                job.clone()
            })
            .collect();
        released.sort_by_key(|job| job.expires_at);
        for job in &released {
            self.journal.append(&ProcessingLog::expired(job, now));
        }
        Ok(released)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<Job>, QueueError> {
        let jobs = self.lock();
        let mut matching: Vec<&Job> = jobs
            .values()
            .filter(|job| query.slot_id.as_deref().is_none_or(|slot| job.slot_id == slot))
            .filter(|job| query.is_finalized.is_none_or(|f| job.is_finalized == f))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let offset = usize::try_from(query.effective_offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.effective_limit()).unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn in_flight(&self, now: Timestamp) -> Result<i64, QueueError> {
        Ok(count_in_flight(&self.lock(), now))
    }

    async fn record_provider_reference(
        &self,
        id: JobId,
        reference: &str,
        now: Timestamp,
    ) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.is_finalized {
            return Err(QueueError::AlreadyFinalized(id));
        }
        job.provider_job_reference = Some(reference.to_string());
        job.updated_at = now;
        Ok(())
    }

    async fn purge_expired_results(&self, now: Timestamp) -> Result<Vec<String>, QueueError> {
        let mut jobs = self.lock();
        let mut paths = Vec::new();
        for job in jobs.values_mut() {
            let has_result =
                job.result_file_path.is_some() || job.result_inline_payload.is_some();
            let expired = job.result_expires_at.is_some_and(|at| at <= now);
            if job.is_finalized && has_result && expired {
                if let Some(path) = job.result_file_path.take() {
                    paths.push(path);
                }
                job.clear_result();
            }
        }
        Ok(paths)
    }
}
