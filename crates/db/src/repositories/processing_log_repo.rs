//! Repository for the append-only `processing_logs` table.

use photochanger_core::types::JobId;
use sqlx::{PgConnection, PgPool};

use crate::models::processing_log::ProcessingLog;
use crate::repositories::StatsRepo;

const COLUMNS: &str = "\
    id, job_id, slot_id, status, occurred_at, message, details, provider_latency_ms";

pub struct ProcessingLogRepo;

impl ProcessingLogRepo {
    /// Append one entry. Takes a connection so it can join the caller's
    /// transaction with the aggregate upserts.
    pub async fn insert(conn: &mut PgConnection, log: &ProcessingLog) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO processing_logs ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&query)
            .bind(log.id)
            .bind(log.job_id)
            .bind(&log.slot_id)
            .bind(log.status)
            .bind(log.occurred_at)
            .bind(&log.message)
            .bind(&log.details)
            .bind(log.provider_latency_ms)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Append one entry together with the aggregate increments it implies.
    ///
    /// Runs on the caller's connection; callers pass a transaction so the
    /// entry lands with the state change it describes.
    pub async fn append(conn: &mut PgConnection, log: &ProcessingLog) -> Result<(), sqlx::Error> {
        Self::insert(&mut *conn, log).await?;
        for update in log.aggregate_updates() {
            StatsRepo::increment(
                &mut *conn,
                &update.scope,
                update.window,
                update.period_start,
                update.period_end,
                &update.delta,
            )
            .await?;
        }
        Ok(())
    }

    /// Every entry for a job in occurrence order.
    pub async fn list_for_job(pool: &PgPool, job_id: JobId) -> Result<Vec<ProcessingLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM processing_logs WHERE job_id = $1 ORDER BY occurred_at ASC, id ASC"
        );
        sqlx::query_as::<_, ProcessingLog>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
