//! Repository for the `jobs` table.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never wait on
//! each other or see the same row. Admission is serialized with a
//! transaction-scoped advisory lock so the in-flight count and the insert
//! form one unit. Admission, finalization and expiry append their
//! processing log in the same transaction as the row change.

use photochanger_core::types::{JobId, Timestamp};
use sqlx::PgPool;

use crate::models::job::{Job, JobListQuery, RecentResultRow};
use crate::models::processing_log::ProcessingLog;
use crate::models::status::{FailureReason, JobStatus};
use crate::repositories::ProcessingLogRepo;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, slot_id, status, is_finalized, failure_reason, \
    expires_at, created_at, updated_at, finalized_at, \
    payload_path, provider_job_reference, \
    result_file_path, result_inline_payload, result_mime_type, \
    result_size_bytes, result_checksum, result_expires_at";

/// Advisory lock key guarding admission control.
const ADMISSION_LOCK_KEY: i64 = 0x5048_4f54_4f51; // "PHOTOQ"

/// Outcome of an admission-controlled insert.
#[derive(Debug)]
pub enum Admission {
    Accepted(Job),
    Busy { in_flight: i64 },
}

/// Provides queue operations on background jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert `job` unless `max_in_flight` live jobs already exist.
    ///
    /// A job is live while it is not finalized and `expires_at > now`.
    /// The `received` entry is appended with the insert.
    pub async fn enqueue(
        pool: &PgPool,
        job: &Job,
        max_in_flight: i64,
        now: Timestamp,
    ) -> Result<Admission, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ADMISSION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let in_flight: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE is_finalized = FALSE AND expires_at > $1",
        )
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if in_flight >= max_in_flight {
            tx.rollback().await?;
            return Ok(Admission::Busy { in_flight });
        }

        let query = format!(
            "INSERT INTO jobs \
                 (id, slot_id, status, is_finalized, expires_at, created_at, updated_at, \
                  payload_path, provider_job_reference) \
             VALUES ($1, $2, $3, FALSE, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let stored = sqlx::query_as::<_, Job>(&query)
            .bind(job.id)
            .bind(&job.slot_id)
            .bind(JobStatus::Pending)
            .bind(job.expires_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(&job.payload_path)
            .bind(&job.provider_job_reference)
            .fetch_one(&mut *tx)
            .await?;
        ProcessingLogRepo::append(&mut *tx, &ProcessingLog::received(&stored)).await?;

        tx.commit().await?;
        Ok(Admission::Accepted(stored))
    }

    /// Atomically claim the oldest pending, live job and mark it processing.
    pub async fn claim_next(pool: &PgPool, now: Timestamp) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $1, updated_at = $2 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status = $3 AND is_finalized = FALSE AND expires_at >= $2 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing)
            .bind(now)
            .bind(JobStatus::Pending)
            .fetch_optional(pool)
            .await
    }

    /// Persist the terminal state carried by `job` and append `log`, if the
    /// row is not finalized yet. Returns `None` without writing anything
    /// when the row was already terminal (or does not exist).
    pub async fn finalize(
        pool: &PgPool,
        job: &Job,
        log: &ProcessingLog,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET is_finalized = TRUE, failure_reason = $2, finalized_at = $3, updated_at = $3, \
                 result_file_path = $4, result_inline_payload = $5, result_mime_type = $6, \
                 result_size_bytes = $7, result_checksum = $8, result_expires_at = $9 \
             WHERE id = $1 AND is_finalized = FALSE \
             RETURNING {COLUMNS}"
        );
        let mut tx = pool.begin().await?;
        let stored = sqlx::query_as::<_, Job>(&query)
            .bind(job.id)
            .bind(job.failure_reason)
            .bind(job.finalized_at)
            .bind(&job.result_file_path)
            .bind(&job.result_inline_payload)
            .bind(&job.result_mime_type)
            .bind(job.result_size_bytes)
            .bind(&job.result_checksum)
            .bind(job.result_expires_at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(stored) = stored else {
            tx.rollback().await?;
            return Ok(None);
        };
        ProcessingLogRepo::append(&mut *tx, log).await?;
        tx.commit().await?;
        Ok(Some(stored))
    }

    /// Finalize every live-but-overdue job as `timeout` in one statement,
    /// appending a `timeout` entry for each.
    pub async fn release_expired(pool: &PgPool, now: Timestamp) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET is_finalized = TRUE, failure_reason = $2, finalized_at = $1, updated_at = $1, \
                 result_file_path = NULL, result_inline_payload = NULL, result_mime_type = NULL, \
                 result_size_bytes = NULL, result_checksum = NULL, result_expires_at = NULL \
             WHERE is_finalized = FALSE AND expires_at < $1 \
             RETURNING {COLUMNS}"
        );
        let mut tx = pool.begin().await?;
        let released = sqlx::query_as::<_, Job>(&query)
            .bind(now)
            .bind(FailureReason::Timeout)
            .fetch_all(&mut *tx)
            .await?;
        for job in &released {
            ProcessingLogRepo::append(&mut *tx, &ProcessingLog::expired(job, now)).await?;
        }
        tx.commit().await?;
        Ok(released)
    }

    /// Store the provider's reference for a job that is still running.
    ///
    /// Returns `false` if the job is missing or already finalized.
    pub async fn set_provider_reference(
        pool: &PgPool,
        id: JobId,
        reference: &str,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET provider_job_reference = $2, updated_at = $3 \
             WHERE id = $1 AND is_finalized = FALSE",
        )
        .bind(id)
        .bind(reference)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear result artifacts whose retention has passed.
    ///
    /// Returns the file paths that were referenced so the caller can
    /// remove them from storage.
    pub async fn purge_expired_results(
        pool: &PgPool,
        now: Timestamp,
    ) -> Result<Vec<String>, sqlx::Error> {
        let paths: Vec<Option<String>> = sqlx::query_scalar(
            "WITH expired AS ( \
                 SELECT id, result_file_path FROM jobs \
                 WHERE is_finalized = TRUE \
                   AND result_expires_at <= $1 \
                   AND (result_file_path IS NOT NULL OR result_inline_payload IS NOT NULL) \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE jobs AS j \
             SET result_file_path = NULL, result_inline_payload = NULL, result_mime_type = NULL, \
                 result_size_bytes = NULL, result_checksum = NULL \
             FROM expired \
             WHERE j.id = expired.id \
             RETURNING expired.result_file_path",
        )
        .bind(now)
        .fetch_all(pool)
        .await?;
        Ok(paths.into_iter().flatten().collect())
    }

    /// Count jobs that hold an admission slot at `now`.
    pub async fn count_in_flight(pool: &PgPool, now: Timestamp) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE is_finalized = FALSE AND expires_at > $1",
        )
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs, newest first, with optional slot/finalized filters.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.slot_id.is_some() {
            conditions.push(format!("slot_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.is_finalized.is_some() {
            conditions.push(format!("is_finalized = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query);
        if let Some(slot_id) = &params.slot_id {
            q = q.bind(slot_id);
        }
        if let Some(finalized) = params.is_finalized {
            q = q.bind(finalized);
        }
        q = q.bind(params.effective_limit()).bind(params.effective_offset());

        q.fetch_all(pool).await
    }

    /// Successful jobs of a slot finalized at or after `since`, newest first.
    pub async fn recent_results(
        pool: &PgPool,
        slot_id: &str,
        since: Timestamp,
        limit: i64,
    ) -> Result<Vec<RecentResultRow>, sqlx::Error> {
        sqlx::query_as::<_, RecentResultRow>(
            "SELECT id, slot_id, finalized_at, result_file_path, result_mime_type, \
                    result_size_bytes, result_expires_at \
             FROM jobs \
             WHERE slot_id = $1 AND is_finalized = TRUE AND failure_reason IS NULL \
               AND finalized_at >= $2 \
             ORDER BY finalized_at DESC \
             LIMIT $3",
        )
        .bind(slot_id)
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
