//! Job entity: one ingest request's full lifecycle.

use photochanger_core::deadlines::{self, JobDeadline};
use photochanger_core::error::CoreError;
use photochanger_core::stats::RecentResult;
use photochanger_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{FailureReason, JobStatus};

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub slot_id: String,
    pub status: JobStatus,
    pub is_finalized: bool,
    pub failure_reason: Option<FailureReason>,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub finalized_at: Option<Timestamp>,
    pub payload_path: Option<String>,
    pub provider_job_reference: Option<String>,
    pub result_file_path: Option<String>,
    pub result_inline_payload: Option<String>,
    pub result_mime_type: Option<String>,
    pub result_size_bytes: Option<i64>,
    pub result_checksum: Option<String>,
    pub result_expires_at: Option<Timestamp>,
}

/// Result artifact attached to a successful job.
///
/// Exactly one of `file_path` and `inline_payload` (base64) is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub file_path: Option<String>,
    pub inline_payload: Option<String>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum: String,
}

/// Query parameters for job listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub slot_id: Option<String>,
    pub is_finalized: Option<bool>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

impl JobListQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

impl Job {
    /// A fresh, unclaimed job. `expires_at` comes from the deadline engine.
    pub fn new_pending(
        slot_id: impl Into<String>,
        payload_path: Option<String>,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            slot_id: slot_id.into(),
            status: JobStatus::Pending,
            is_finalized: false,
            failure_reason: None,
            expires_at,
            created_at,
            updated_at: created_at,
            finalized_at: None,
            payload_path,
            provider_job_reference: None,
            result_file_path: None,
            result_inline_payload: None,
            result_mime_type: None,
            result_size_bytes: None,
            result_checksum: None,
            result_expires_at: None,
        }
    }

    pub fn deadline(&self, now: Timestamp) -> JobDeadline {
        deadlines::deadline_info(self.expires_at, now)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn is_succeeded(&self) -> bool {
        self.is_finalized && self.failure_reason.is_none()
    }

    /// Turn this job into a successful terminal state.
    pub fn finalize_success(
        &mut self,
        result: JobResult,
        finalized_at: Timestamp,
        retention_hours: i64,
    ) -> Result<(), CoreError> {
        let result_expires_at = deadlines::result_expires_at(finalized_at, retention_hours)?;
        self.is_finalized = true;
        self.failure_reason = None;
        self.finalized_at = Some(finalized_at);
        self.updated_at = finalized_at;
        self.result_file_path = result.file_path;
        self.result_inline_payload = result.inline_payload;
        self.result_mime_type = Some(result.mime_type);
        self.result_size_bytes = Some(result.size_bytes);
        self.result_checksum = Some(result.checksum);
        self.result_expires_at = Some(result_expires_at);
        Ok(())
    }

    /// Turn this job into a failed terminal state with no result fields.
    pub fn finalize_failure(&mut self, reason: FailureReason, finalized_at: Timestamp) {
        self.is_finalized = true;
        self.failure_reason = Some(reason);
        self.finalized_at = Some(finalized_at);
        self.updated_at = finalized_at;
        self.clear_result();
        self.result_expires_at = None;
    }

    /// Drop the result artifact fields; `result_expires_at` stays as history.
    pub fn clear_result(&mut self) {
        self.result_file_path = None;
        self.result_inline_payload = None;
        self.result_mime_type = None;
        self.result_size_bytes = None;
        self.result_checksum = None;
    }

    /// Whether `other` carries the same terminal payload as `self`.
    ///
    /// Timestamps compare at microsecond precision, the resolution of
    /// `TIMESTAMPTZ`.
    pub fn same_terminal_state(&self, other: &Job) -> bool {
        self.is_finalized == other.is_finalized
            && self.failure_reason == other.failure_reason
            && micros(self.finalized_at) == micros(other.finalized_at)
            && self.result_file_path == other.result_file_path
            && self.result_inline_payload == other.result_inline_payload
            && self.result_mime_type == other.result_mime_type
            && self.result_size_bytes == other.result_size_bytes
            && self.result_checksum == other.result_checksum
            && micros(self.result_expires_at) == micros(other.result_expires_at)
    }

    /// Recent-results projection, for successful jobs only.
    pub fn as_recent_result(&self) -> Option<RecentResult> {
        if !self.is_succeeded() {
            return None;
        }
        Some(RecentResult {
            job_id: self.id,
            slot_id: self.slot_id.clone(),
            finalized_at: self.finalized_at?,
            result_file_path: self.result_file_path.clone(),
            result_mime_type: self.result_mime_type.clone(),
            result_size_bytes: self.result_size_bytes,
            result_expires_at: self.result_expires_at,
        })
    }

    /// Check that this job describes a consistent terminal state.
    pub fn validate_terminal(&self) -> Result<(), CoreError> {
        if !self.is_finalized || self.finalized_at.is_none() {
            return Err(CoreError::Validation(format!(
                "job {} is not in a terminal state",
                self.id
            )));
        }
        let has_result = self.result_file_path.is_some() || self.result_inline_payload.is_some();
        match self.failure_reason {
            None if !has_result || self.result_expires_at.is_none() => {
                Err(CoreError::Validation(format!(
                    "successful job {} needs a result and its expiry",
                    self.id
                )))
            }
            Some(reason)
                if has_result
                    || self.result_mime_type.is_some()
                    || self.result_expires_at.is_some() =>
            {
                Err(CoreError::Validation(format!(
                    "job {} failed with {reason} but carries result fields",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }
}

fn micros(at: Option<Timestamp>) -> Option<i64> {
    at.map(|t| t.timestamp_micros())
}

/// Projection of a successful job for the recent-results listing.
#[derive(Debug, Clone, FromRow)]
pub struct RecentResultRow {
    pub id: JobId,
    pub slot_id: String,
    pub finalized_at: Timestamp,
    pub result_file_path: Option<String>,
    pub result_mime_type: Option<String>,
    pub result_size_bytes: Option<i64>,
    pub result_expires_at: Option<Timestamp>,
}

impl From<RecentResultRow> for RecentResult {
    fn from(row: RecentResultRow) -> Self {
        Self {
            job_id: row.id,
            slot_id: row.slot_id,
            finalized_at: row.finalized_at,
            result_file_path: row.result_file_path,
            result_mime_type: row.result_mime_type,
            result_size_bytes: row.result_size_bytes,
            result_expires_at: row.result_expires_at,
        }
    }
}
