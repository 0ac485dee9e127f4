//! Append-only audit records written on every job transition.

use photochanger_core::stats::{StatsCounters, StatsWindow, GLOBAL_SCOPE};
use photochanger_core::types::{JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::job::Job;
use super::status::ProcessingStatus;

/// A row from the `processing_logs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ProcessingLog {
    pub id: Uuid,
    pub job_id: JobId,
    pub slot_id: String,
    pub status: ProcessingStatus,
    pub occurred_at: Timestamp,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
    pub provider_latency_ms: Option<i64>,
}

/// One additive change to an aggregate row.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateUpdate {
    pub scope: String,
    pub window: StatsWindow,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub delta: StatsCounters,
}

impl ProcessingLog {
    pub fn new(
        job_id: JobId,
        slot_id: impl Into<String>,
        status: ProcessingStatus,
        occurred_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            slot_id: slot_id.into(),
            status,
            occurred_at,
            message: None,
            details: None,
            provider_latency_ms: None,
        }
    }

    /// Entry written when `job` is admitted.
    pub fn received(job: &Job) -> Self {
        Self::new(job.id, &job.slot_id, ProcessingStatus::Received, job.created_at).with_details(
            serde_json::json!({
                "payload_path": job.payload_path,
                "expires_at": job.expires_at,
            }),
        )
    }

    /// Entry written when `job` is timed out by the expiry sweep.
    pub fn expired(job: &Job, now: Timestamp) -> Self {
        Self::new(job.id, &job.slot_id, ProcessingStatus::Timeout, now)
            .with_message("deadline passed while in flight")
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: i64) -> Self {
        self.provider_latency_ms = Some(latency_ms);
        self
    }

    /// Aggregate rows touched by this entry: its slot and the global scope,
    /// for every window. Audit-only statuses touch nothing.
    pub fn aggregate_updates(&self) -> Vec<AggregateUpdate> {
        let Some(kind) = self.status.counter() else {
            return Vec::new();
        };
        let delta = StatsCounters::single(kind);
        [self.slot_id.as_str(), GLOBAL_SCOPE]
            .into_iter()
            .flat_map(|scope| {
                StatsWindow::ALL.into_iter().map(move |window| {
                    let (period_start, period_end) = window.period_bounds(self.occurred_at);
                    AggregateUpdate {
                        scope: scope.to_string(),
                        window,
                        period_start,
                        period_end,
                        delta,
                    }
                })
            })
            .collect()
    }
}
