//! Deadline arithmetic shared by ingest, queue and worker.
//!
//! Every function here is pure. The synchronous budget `T_sync_response`
//! drives `jobs.expires_at` and the public link TTL of temporary media;
//! `T_result_retention` drives `jobs.result_expires_at`.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Default synchronous response budget in seconds.
pub const DEFAULT_SYNC_RESPONSE_SECS: u32 = 48;

/// Default result retention in hours.
pub const DEFAULT_RESULT_RETENTION_HOURS: i64 = 72;

/// Deadline snapshot returned to ingest and admin polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobDeadline {
    pub expires_at: Timestamp,
    pub remaining_ms: i64,
    pub is_expired: bool,
}

/// Compute `jobs.expires_at = created_at + T_sync_response`.
///
/// The public link TTL must equal the synchronous budget, otherwise a
/// provider could be handed a link that outlives (or dies before) the job.
pub fn job_expires_at(
    created_at: Timestamp,
    sync_timeout_sec: u32,
    public_link_ttl_sec: u32,
) -> Result<Timestamp, CoreError> {
    if sync_timeout_sec == 0 {
        return Err(CoreError::Validation(
            "T_sync_response must be positive".to_string(),
        ));
    }
    if public_link_ttl_sec != sync_timeout_sec {
        return Err(CoreError::Validation(format!(
            "public link TTL ({public_link_ttl_sec}s) must equal T_sync_response ({sync_timeout_sec}s)"
        )));
    }
    created_at
        .checked_add_signed(Duration::seconds(i64::from(sync_timeout_sec)))
        .ok_or_else(|| CoreError::Validation("job deadline is out of range".to_string()))
}

/// Configured synchronous budget applied to every admitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    pub sync_timeout_sec: u32,
    pub public_link_ttl_sec: u32,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            sync_timeout_sec: DEFAULT_SYNC_RESPONSE_SECS,
            public_link_ttl_sec: DEFAULT_SYNC_RESPONSE_SECS,
        }
    }
}

impl DeadlinePolicy {
    /// Policy whose link TTL equals `sync_timeout_sec`.
    pub fn new(sync_timeout_sec: u32) -> Self {
        Self {
            sync_timeout_sec,
            public_link_ttl_sec: sync_timeout_sec,
        }
    }

    /// Deadline of a job created at `created_at`.
    pub fn expires_at(&self, created_at: Timestamp) -> Result<Timestamp, CoreError> {
        job_expires_at(created_at, self.sync_timeout_sec, self.public_link_ttl_sec)
    }

    /// Reject a deadline that was not derived from this policy.
    pub fn check(&self, created_at: Timestamp, expires_at: Timestamp) -> Result<(), CoreError> {
        let expected = self.expires_at(created_at)?;
        if expires_at != expected {
            return Err(CoreError::Conflict(format!(
                "expires_at {expires_at} does not match created_at + {}s ({expected})",
                self.sync_timeout_sec
            )));
        }
        Ok(())
    }
}

/// Build a [`JobDeadline`] for `expires_at` as seen at `now`.
pub fn deadline_info(expires_at: Timestamp, now: Timestamp) -> JobDeadline {
    let remaining_ms = (expires_at - now).num_milliseconds().max(0);
    JobDeadline {
        expires_at,
        remaining_ms,
        is_expired: remaining_ms == 0,
    }
}

/// Expiry of a temporary artifact: its own TTL, capped by the job deadline.
pub fn artifact_expiry(
    artifact_created_at: Timestamp,
    job_expires_at: Timestamp,
    ttl_seconds: u32,
) -> Timestamp {
    artifact_created_at
        .checked_add_signed(Duration::seconds(i64::from(ttl_seconds)))
        .map_or(job_expires_at, |own| own.min(job_expires_at))
}

/// Compute `jobs.result_expires_at = finalized_at + T_result_retention`.
pub fn result_expires_at(
    finalized_at: Timestamp,
    retention_hours: i64,
) -> Result<Timestamp, CoreError> {
    if retention_hours <= 0 {
        return Err(CoreError::Validation(format!(
            "result retention must be positive, got {retention_hours}h"
        )));
    }
    finalized_at
        .checked_add_signed(Duration::hours(retention_hours))
        .ok_or_else(|| CoreError::Validation("result expiry is out of range".to_string()))
}

/// Time left before `expires_at`, zero once it has passed.
pub fn remaining(expires_at: Timestamp, now: Timestamp) -> StdDuration {
    (expires_at - now).to_std().unwrap_or(StdDuration::ZERO)
}

/// Whether an operation taking `needed`, started at `now`, completes no
/// later than `expires_at`.
pub fn fits_before_deadline(now: Timestamp, expires_at: Timestamp, needed: StdDuration) -> bool {
    remaining(expires_at, now) >= needed && now < expires_at
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn expires_at_adds_sync_budget() {
        let expires = job_expires_at(t0(), 30, 30).unwrap();
        assert_eq!(expires, t0() + Duration::seconds(30));
    }

    #[test]
    fn mismatched_link_ttl_is_rejected() {
        let err = job_expires_at(t0(), 48, 60).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn zero_budget_is_rejected() {
        assert!(job_expires_at(t0(), 0, 0).is_err());
    }

    #[test]
    fn policy_accepts_only_its_own_deadline() {
        let policy = DeadlinePolicy::new(30);
        assert!(policy.check(t0(), t0() + Duration::seconds(30)).is_ok());

        let err = policy.check(t0(), t0() + Duration::seconds(48)).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(policy.check(t0(), t0() + Duration::seconds(29)).is_err());
    }

    #[test]
    fn invalid_policy_rejects_every_deadline() {
        let policy = DeadlinePolicy {
            sync_timeout_sec: 48,
            public_link_ttl_sec: 60,
        };
        assert!(matches!(
            policy.check(t0(), t0() + Duration::seconds(48)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn deadline_info_counts_down_and_clamps() {
        let expires = t0() + Duration::seconds(10);

        let info = deadline_info(expires, t0() + Duration::milliseconds(2_500));
        assert_eq!(info.remaining_ms, 7_500);
        assert!(!info.is_expired);

        let late = deadline_info(expires, t0() + Duration::seconds(45));
        assert_eq!(late.remaining_ms, 0);
        assert!(late.is_expired);
    }

    #[test]
    fn artifact_expiry_is_capped_by_job_deadline() {
        let job_expires = t0() + Duration::seconds(48);
        assert_eq!(artifact_expiry(t0(), job_expires, 20), t0() + Duration::seconds(20));
        assert_eq!(artifact_expiry(t0(), job_expires, 600), job_expires);
    }

    #[test]
    fn result_retention_is_72_hours_by_default() {
        let finalized = t0() + Duration::seconds(10);
        let expires = result_expires_at(finalized, DEFAULT_RESULT_RETENTION_HOURS).unwrap();
        assert_eq!(expires, t0() + Duration::seconds(10) + Duration::hours(72));
    }

    #[test]
    fn non_positive_retention_is_rejected() {
        assert!(result_expires_at(t0(), 0).is_err());
        assert!(result_expires_at(t0(), -1).is_err());
    }

    #[test]
    fn next_poll_must_fit_before_deadline() {
        let expires = t0() + Duration::seconds(10);
        assert!(fits_before_deadline(t0(), expires, StdDuration::from_secs(10)));
        assert!(!fits_before_deadline(
            t0() + Duration::seconds(6),
            expires,
            StdDuration::from_secs(5)
        ));
        assert!(!fits_before_deadline(expires, expires, StdDuration::ZERO));
    }
}
