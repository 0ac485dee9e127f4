//! Repository for `processing_log_aggregates`.
//!
//! Counters are only ever added to: every upsert increments the existing
//! row for its `(scope, granularity, period_start, period_end)` key.

use photochanger_core::stats::{StatsCounters, StatsWindow};
use photochanger_core::types::Timestamp;
use sqlx::{PgConnection, PgPool};

use crate::models::stats_aggregate::StatsAggregateRow;

const COLUMNS: &str = "\
    scope, granularity, period_start, period_end, \
    success, timeouts, provider_errors, cancelled, errors, ingest_count";

pub struct StatsRepo;

impl StatsRepo {
    /// Add `delta` to the aggregate row for one period, creating it if needed.
    pub async fn increment(
        conn: &mut PgConnection,
        scope: &str,
        window: StatsWindow,
        period_start: Timestamp,
        period_end: Timestamp,
        delta: &StatsCounters,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO processing_log_aggregates \
                 (scope, granularity, period_start, period_end, \
                  success, timeouts, provider_errors, cancelled, errors, ingest_count, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) \
             ON CONFLICT (scope, granularity, period_start, period_end) DO UPDATE SET \
                 success = processing_log_aggregates.success + EXCLUDED.success, \
                 timeouts = processing_log_aggregates.timeouts + EXCLUDED.timeouts, \
                 provider_errors = processing_log_aggregates.provider_errors + EXCLUDED.provider_errors, \
                 cancelled = processing_log_aggregates.cancelled + EXCLUDED.cancelled, \
                 errors = processing_log_aggregates.errors + EXCLUDED.errors, \
                 ingest_count = processing_log_aggregates.ingest_count + EXCLUDED.ingest_count, \
                 updated_at = NOW()",
        )
        .bind(scope)
        .bind(window.as_str())
        .bind(period_start)
        .bind(period_end)
        .bind(delta.success)
        .bind(delta.timeouts)
        .bind(delta.provider_errors)
        .bind(delta.cancelled)
        .bind(delta.errors)
        .bind(delta.ingest_count)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Periods of one scope/granularity ending after `since`, oldest first.
    pub async fn list(
        pool: &PgPool,
        scope: &str,
        window: StatsWindow,
        since: Timestamp,
    ) -> Result<Vec<StatsAggregateRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM processing_log_aggregates \
             WHERE scope = $1 AND granularity = $2 AND period_end > $3 \
             ORDER BY period_start ASC"
        );
        sqlx::query_as::<_, StatsAggregateRow>(&query)
            .bind(scope)
            .bind(window.as_str())
            .bind(since)
            .fetch_all(pool)
            .await
    }
}
