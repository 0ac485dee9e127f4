//! Persistence behind the statistics cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use photochanger_core::stats::{RecentResult, StatsCounters, StatsMetric, StatsScope, StatsWindow};
use photochanger_core::types::Timestamp;
use photochanger_db::models::processing_log::ProcessingLog;

use crate::error::StatsError;
use crate::queue::MemoryJobQueue;

#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Persist one audit entry together with its aggregate increments.
    async fn record(&self, log: &ProcessingLog) -> Result<(), StatsError>;

    /// Aggregate periods of `scope`/`window` ending after `since`, oldest first.
    async fn load_metrics(
        &self,
        scope: &StatsScope,
        window: StatsWindow,
        since: Timestamp,
    ) -> Result<Vec<StatsMetric>, StatsError>;

    /// Successful jobs of `slot_id` finalized at or after `since`, newest first.
    async fn recent_results(
        &self,
        slot_id: &str,
        since: Timestamp,
        limit: usize,
    ) -> Result<Vec<RecentResult>, StatsError>;
}

type AggregateKey = (String, StatsWindow, Timestamp);

#[derive(Default)]
struct JournalState {
    logs: Vec<ProcessingLog>,
    aggregates: HashMap<AggregateKey, (Timestamp, StatsCounters)>,
}

/// In-process processing log with its aggregate counters.
///
/// [`MemoryJobQueue`] appends admission and terminal entries while it holds
/// its own lock, so a job transition and its entry are one step.
#[derive(Default)]
pub struct MemoryJournal {
    state: Mutex<JournalState>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, log: &ProcessingLog) {
        let mut state = self.lock();
        for update in log.aggregate_updates() {
            let entry = state
                .aggregates
                .entry((update.scope, update.window, update.period_start))
                .or_insert((update.period_end, StatsCounters::default()));
            entry.1 = entry.1.add(&update.delta);
        }
        state.logs.push(log.clone());
    }

    /// Every entry, in append order.
    pub fn logs(&self) -> Vec<ProcessingLog> {
        self.lock().logs.clone()
    }

    fn metrics(&self, scope: &StatsScope, window: StatsWindow, since: Timestamp) -> Vec<StatsMetric> {
        let state = self.lock();
        let mut metrics: Vec<StatsMetric> = state
            .aggregates
            .iter()
            .filter(|((key, w, _), (end, _))| key == scope.as_key() && *w == window && *end > since)
            .map(|((_, _, start), (end, counters))| StatsMetric {
                period_start: *start,
                period_end: *end,
                counters: *counters,
            })
            .collect();
        metrics.sort_by_key(|m| m.period_start);
        metrics
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process stats store over a [`MemoryJournal`]. Recent results come
/// from an optional [`MemoryJobQueue`].
#[derive(Default)]
pub struct MemoryStatsStore {
    journal: Arc<MemoryJournal>,
    jobs: Option<Arc<MemoryJobQueue>>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the journal of `jobs` so queue transitions and audit entries
    /// land in one log.
    pub fn with_jobs(jobs: Arc<MemoryJobQueue>) -> Self {
        Self {
            journal: jobs.journal(),
            jobs: Some(jobs),
        }
    }

    /// Every recorded entry, in recording order.
    pub fn logs(&self) -> Vec<ProcessingLog> {
        self.journal.logs()
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn record(&self, log: &ProcessingLog) -> Result<(), StatsError> {
        self.journal.append(log);
        Ok(())
    }

    async fn load_metrics(
        &self,
        scope: &StatsScope,
        window: StatsWindow,
        since: Timestamp,
    ) -> Result<Vec<StatsMetric>, StatsError> {
        Ok(self.journal.metrics(scope, window, since))
    }

    async fn recent_results(
        &self,
        slot_id: &str,
        since: Timestamp,
        limit: usize,
    ) -> Result<Vec<RecentResult>, StatsError> {
        let Some(jobs) = &self.jobs else {
            return Ok(Vec::new());
        };
        let mut results: Vec<RecentResult> = jobs
            .snapshot()
            .iter()
            .filter(|job| job.slot_id == slot_id)
            .filter_map(|job| job.as_recent_result())
            .filter(|result| result.finalized_at >= since)
            .collect();
        results.sort_by(|a, b| b.finalized_at.cmp(&a.finalized_at));
        results.truncate(limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use photochanger_db::models::job::Job;
    use photochanger_db::models::status::{FailureReason, ProcessingStatus};
    use uuid::Uuid;

    use crate::queue::JobQueue;

    use super::*;

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 7, 3, h, m, 0).unwrap()
    }

    fn log(slot: &str, status: ProcessingStatus, occurred_at: Timestamp) -> ProcessingLog {
        ProcessingLog::new(Uuid::now_v7(), slot, status, occurred_at)
    }

    #[tokio::test]
    async fn memory_store_sums_events_per_period() {
        let store = MemoryStatsStore::new();
        store.record(&log("slot-001", ProcessingStatus::Succeeded, at(9, 5))).await.unwrap();
        store.record(&log("slot-001", ProcessingStatus::Timeout, at(9, 40))).await.unwrap();
        store.record(&log("slot-002", ProcessingStatus::Succeeded, at(10, 5))).await.unwrap();

        let since = at(0, 0) - Duration::days(1);
        let slot_hours = store
            .load_metrics(&StatsScope::slot("slot-001"), StatsWindow::Hour, since)
            .await
            .unwrap();
        assert_eq!(slot_hours.len(), 1);
        assert_eq!(slot_hours[0].counters.success, 1);
        assert_eq!(slot_hours[0].counters.timeouts, 1);

        let global_days = store
            .load_metrics(&StatsScope::Global, StatsWindow::Day, since)
            .await
            .unwrap();
        assert_eq!(global_days.len(), 1);
        assert_eq!(global_days[0].counters.success, 2);
        assert_eq!(store.logs().len(), 3);
    }

    #[tokio::test]
    async fn store_built_on_a_queue_sees_its_transitions() {
        let queue = Arc::new(MemoryJobQueue::new(10));
        let store = MemoryStatsStore::with_jobs(queue.clone());

        let job = queue
            .enqueue(Job::new_pending("slot-001", None, at(9, 0), at(9, 0) + Duration::seconds(48)))
            .await
            .unwrap();
        queue.release_expired(at(9, 5)).await.unwrap();

        let statuses: Vec<_> = store.logs().iter().map(|l| (l.job_id, l.status)).collect();
        assert_eq!(
            statuses,
            vec![(job.id, ProcessingStatus::Received), (job.id, ProcessingStatus::Timeout)]
        );
        let hours = store
            .load_metrics(&StatsScope::slot("slot-001"), StatsWindow::Hour, at(0, 0))
            .await
            .unwrap();
        assert_eq!(hours[0].counters.ingest_count, 1);
        assert_eq!(hours[0].counters.timeouts, 1);
        let stored = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_reason, Some(FailureReason::Timeout));
    }
}
