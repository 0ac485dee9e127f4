//! Cached statistics with event-driven invalidation.
//!
//! Aggregations are cached per `(scope, window, since)` for a scope-specific
//! TTL. Recording an audit entry for a slot drops every cached value of
//! that slot and of the global scope in one critical section. A per-scope
//! generation counter keeps a computation that raced with an invalidation
//! from being cached afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use photochanger_core::clock::Clock;
use photochanger_core::stats::{
    normalize_since, RecentResult, StatsAggregation, StatsScope, StatsWindow, GLOBAL_CACHE_TTL,
    GLOBAL_SCOPE, RECENT_RESULTS_LIMIT, RECENT_RESULTS_WINDOW_HOURS, SLOT_CACHE_TTL,
};
use photochanger_core::types::Timestamp;
use photochanger_db::models::processing_log::ProcessingLog;

use crate::error::StatsError;

pub mod postgres;
pub mod store;

pub use postgres::PgStatsStore;
pub use store::{MemoryJournal, MemoryStatsStore, StatsStore};

/// Cache lifetimes and write retry bounds.
#[derive(Debug, Clone)]
pub struct StatsCacheConfig {
    /// Zero disables caching for slot scopes.
    pub slot_ttl: Duration,
    /// Zero disables caching for the global scope.
    pub global_ttl: Duration,
    /// Attempts to persist one audit entry before giving up.
    pub write_attempts: u32,
    pub write_retry_delay: Duration,
}

impl Default for StatsCacheConfig {
    fn default() -> Self {
        Self {
            slot_ttl: SLOT_CACHE_TTL,
            global_ttl: GLOBAL_CACHE_TTL,
            write_attempts: 3,
            write_retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: StatsScope,
    window: StatsWindow,
    /// `None` when the caller asked for the default range.
    since: Option<Timestamp>,
}

struct Cached<T> {
    value: T,
    expires_at: Timestamp,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self, now: Timestamp) -> Option<T> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

#[derive(Default)]
struct CacheState {
    aggregations: HashMap<CacheKey, Cached<StatsAggregation>>,
    recent: HashMap<String, Cached<Vec<RecentResult>>>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, scope_key: &str) -> u64 {
        self.generations.get(scope_key).copied().unwrap_or(0)
    }
}

pub struct StatsCache {
    store: Arc<dyn StatsStore>,
    clock: Arc<dyn Clock>,
    config: StatsCacheConfig,
    state: Mutex<CacheState>,
}

impl StatsCache {
    pub fn new(store: Arc<dyn StatsStore>, clock: Arc<dyn Clock>, config: StatsCacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
            state: Mutex::default(),
        }
    }

    /// Aggregated counters of `scope` for `window` since `since`.
    ///
    /// `since` is clamped to the scope's allowed range; `now` defaults to the
    /// cache's clock.
    pub async fn collect(
        &self,
        scope: StatsScope,
        window: StatsWindow,
        since: Option<Timestamp>,
        now: Option<Timestamp>,
    ) -> Result<StatsAggregation, StatsError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let normalized = normalize_since(&scope, since, now);
        let key = CacheKey {
            since: since.map(|_| normalized),
            scope,
            window,
        };
        let ttl = self.ttl_for(&key.scope);

        let generation = {
            let state = self.lock();
            if !ttl.is_zero() {
                if let Some(hit) = state.aggregations.get(&key).and_then(|c| c.fresh(now)) {
                    return Ok(hit);
                }
            }
            state.generation(key.scope.as_key())
        };

        let metrics = self.store.load_metrics(&key.scope, window, normalized).await?;
        let aggregation = StatsAggregation::from_metrics(window, metrics);

        if let Some(expires_at) = expiry(now, ttl) {
            let mut state = self.lock();
            if state.generation(key.scope.as_key()) == generation {
                state.aggregations.insert(
                    key,
                    Cached {
                        value: aggregation.clone(),
                        expires_at,
                    },
                );
            }
        }
        Ok(aggregation)
    }

    /// Persist `log`, then invalidate the caches it affects.
    ///
    /// Failed writes are retried up to the configured number of attempts;
    /// the last error is returned once they are exhausted.
    pub async fn record_event(&self, log: &ProcessingLog) -> Result<(), StatsError> {
        let attempts = self.config.write_attempts.max(1);
        let mut attempt = 1;
        let result = loop {
            match self.store.record(log).await {
                Ok(()) => break Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        job_id = %log.job_id,
                        slot_id = %log.slot_id,
                        status = %log.status,
                        attempt,
                        error = %e,
                        "Processing log write failed, retrying",
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.write_retry_delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        self.invalidate(&log.slot_id);
        result
    }

    /// Recently completed results of `slot_id`, newest first.
    pub async fn recent_results(
        &self,
        slot_id: &str,
        now: Option<Timestamp>,
    ) -> Result<Vec<RecentResult>, StatsError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let ttl = self.config.slot_ttl;

        let generation = {
            let state = self.lock();
            if !ttl.is_zero() {
                if let Some(hit) = state.recent.get(slot_id).and_then(|c| c.fresh(now)) {
                    return Ok(hit);
                }
            }
            state.generation(slot_id)
        };

        let since = now - chrono::Duration::hours(RECENT_RESULTS_WINDOW_HOURS);
        let mut results = self
            .store
            .recent_results(slot_id, since, RECENT_RESULTS_LIMIT)
            .await?;
        results.sort_by(|a, b| b.finalized_at.cmp(&a.finalized_at));
        results.truncate(RECENT_RESULTS_LIMIT);

        if let Some(expires_at) = expiry(now, ttl) {
            let mut state = self.lock();
            if state.generation(slot_id) == generation {
                state.recent.insert(
                    slot_id.to_string(),
                    Cached {
                        value: results.clone(),
                        expires_at,
                    },
                );
            }
        }
        Ok(results)
    }

    /// Drop cached values of `slot_id` and of the global scope.
    pub fn invalidate(&self, slot_id: &str) {
        let mut state = self.lock();
        state
            .aggregations
            .retain(|key, _| !key.scope.affected_by(slot_id));
        state.recent.remove(slot_id);
        for scope_key in [slot_id, GLOBAL_SCOPE] {
            *state.generations.entry(scope_key.to_string()).or_insert(0) += 1;
        }
        tracing::trace!(slot_id = %slot_id, "Stats cache invalidated");
    }

    fn ttl_for(&self, scope: &StatsScope) -> Duration {
        if scope.is_global() {
            self.config.global_ttl
        } else {
            self.config.slot_ttl
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn expiry(now: Timestamp, ttl: Duration) -> Option<Timestamp> {
    if ttl.is_zero() {
        return None;
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}
