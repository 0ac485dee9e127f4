//! PostgreSQL-backed stats store.

use async_trait::async_trait;
use photochanger_core::stats::{RecentResult, StatsMetric, StatsScope, StatsWindow};
use photochanger_core::types::Timestamp;
use photochanger_db::models::processing_log::ProcessingLog;
use photochanger_db::repositories::{JobRepo, ProcessingLogRepo, StatsRepo};
use photochanger_db::DbPool;

use super::store::StatsStore;
use crate::error::StatsError;

pub struct PgStatsStore {
    pool: DbPool,
}

impl PgStatsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatsStore for PgStatsStore {
    async fn record(&self, log: &ProcessingLog) -> Result<(), StatsError> {
        let mut tx = self.pool.begin().await?;
        ProcessingLogRepo::append(&mut *tx, log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_metrics(
        &self,
        scope: &StatsScope,
        window: StatsWindow,
        since: Timestamp,
    ) -> Result<Vec<StatsMetric>, StatsError> {
        let rows = StatsRepo::list(&self.pool, scope.as_key(), window, since).await?;
        Ok(rows.into_iter().map(StatsMetric::from).collect())
    }

    async fn recent_results(
        &self,
        slot_id: &str,
        since: Timestamp,
        limit: usize,
    ) -> Result<Vec<RecentResult>, StatsError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = JobRepo::recent_results(&self.pool, slot_id, since, limit).await?;
        Ok(rows.into_iter().map(RecentResult::from).collect())
    }
}
