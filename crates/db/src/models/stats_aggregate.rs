//! Rolling counters in `processing_log_aggregates`.

use photochanger_core::stats::{StatsCounters, StatsMetric};
use photochanger_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `processing_log_aggregates` table.
#[derive(Debug, Clone, FromRow)]
pub struct StatsAggregateRow {
    pub scope: String,
    pub granularity: String,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub success: i64,
    pub timeouts: i64,
    pub provider_errors: i64,
    pub cancelled: i64,
    pub errors: i64,
    pub ingest_count: i64,
}

impl From<StatsAggregateRow> for StatsMetric {
    fn from(row: StatsAggregateRow) -> Self {
        Self {
            period_start: row.period_start,
            period_end: row.period_end,
            counters: StatsCounters {
                success: row.success.max(0),
                timeouts: row.timeouts.max(0),
                provider_errors: row.provider_errors.max(0),
                cancelled: row.cancelled.max(0),
                errors: row.errors.max(0),
                ingest_count: row.ingest_count.max(0),
            },
        }
    }
}
