//! Statistics windows, scopes and counter shapes.
//!
//! The cache and the stores live in the pipeline crate; this module only
//! holds the rules both of them agree on: how a `since` bound is clamped,
//! how an event maps onto aggregate periods, and what counters exist.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, NaiveTime, Timelike};
use serde::Serialize;

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Scope key used for system-wide aggregates.
pub const GLOBAL_SCOPE: &str = "__global__";

pub const SLOT_DEFAULT_RANGE_DAYS: i64 = 14;
pub const SLOT_MAX_RANGE_DAYS: i64 = 31;
pub const GLOBAL_DEFAULT_RANGE_DAYS: i64 = 56;
pub const GLOBAL_MAX_RANGE_DAYS: i64 = 90;

pub const SLOT_CACHE_TTL: StdDuration = StdDuration::from_secs(5 * 60);
pub const GLOBAL_CACHE_TTL: StdDuration = StdDuration::from_secs(60);

/// Completed results older than this are not listed as recent.
pub const RECENT_RESULTS_WINDOW_HOURS: i64 = 72;
pub const RECENT_RESULTS_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which aggregate a statistics query or event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatsScope {
    Global,
    Slot(String),
}

impl StatsScope {
    pub fn slot(id: impl Into<String>) -> Self {
        Self::Slot(id.into())
    }

    /// Key stored in `processing_log_aggregates.scope`.
    pub fn as_key(&self) -> &str {
        match self {
            Self::Global => GLOBAL_SCOPE,
            Self::Slot(id) => id,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Whether an event for `slot_id` invalidates data cached under this scope.
    ///
    /// The global scope is affected by every event; a slot scope only by
    /// its own events.
    pub fn affected_by(&self, slot_id: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Slot(id) => id == slot_id,
        }
    }

    fn ranges(&self) -> (Duration, Duration) {
        match self {
            Self::Global => (
                Duration::days(GLOBAL_DEFAULT_RANGE_DAYS),
                Duration::days(GLOBAL_MAX_RANGE_DAYS),
            ),
            Self::Slot(_) => (
                Duration::days(SLOT_DEFAULT_RANGE_DAYS),
                Duration::days(SLOT_MAX_RANGE_DAYS),
            ),
        }
    }
}

/// Clamp a requested lower bound to the range allowed for `scope`.
///
/// A missing bound falls back to the scope's default range; an explicit
/// one may not reach further back than the maximum range, nor past `now`.
pub fn normalize_since(scope: &StatsScope, since: Option<Timestamp>, now: Timestamp) -> Timestamp {
    let (default_range, max_range) = scope.ranges();
    let lower_bound = now - max_range;
    let candidate = since.unwrap_or(now - default_range);
    candidate.max(lower_bound).min(now)
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Aggregation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsWindow {
    Hour,
    Day,
    Week,
}

impl StatsWindow {
    pub const ALL: [StatsWindow; 3] = [Self::Hour, Self::Day, Self::Week];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }

    /// The `[start, end)` period of this granularity containing `at`.
    ///
    /// Weeks start on Monday 00:00 UTC.
    pub fn period_bounds(self, at: Timestamp) -> (Timestamp, Timestamp) {
        let day_start = at.date_naive().and_time(NaiveTime::MIN).and_utc();
        match self {
            Self::Hour => {
                let start = day_start + Duration::hours(i64::from(at.hour()));
                (start, start + Duration::hours(1))
            }
            Self::Day => (day_start, day_start + Duration::days(1)),
            Self::Week => {
                let offset = i64::from(at.weekday().num_days_from_monday());
                let start = day_start - Duration::days(offset);
                (start, start + Duration::weeks(1))
            }
        }
    }
}

impl FromStr for StatsWindow {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            other => Err(CoreError::Validation(format!(
                "unknown stats window '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Counter an audit event contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Success,
    Timeouts,
    ProviderErrors,
    Cancelled,
    Errors,
    Ingest,
}

impl CounterKind {
    /// Column name in `processing_log_aggregates`.
    pub fn column(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeouts => "timeouts",
            Self::ProviderErrors => "provider_errors",
            Self::Cancelled => "cancelled",
            Self::Errors => "errors",
            Self::Ingest => "ingest_count",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsCounters {
    pub success: i64,
    pub timeouts: i64,
    pub provider_errors: i64,
    pub cancelled: i64,
    pub errors: i64,
    pub ingest_count: i64,
}

impl StatsCounters {
    /// Counters with a single increment of `kind`.
    pub fn single(kind: CounterKind) -> Self {
        let mut counters = Self::default();
        counters.increment(kind);
        counters
    }

    pub fn increment(&mut self, kind: CounterKind) {
        match kind {
            CounterKind::Success => self.success += 1,
            CounterKind::Timeouts => self.timeouts += 1,
            CounterKind::ProviderErrors => self.provider_errors += 1,
            CounterKind::Cancelled => self.cancelled += 1,
            CounterKind::Errors => self.errors += 1,
            CounterKind::Ingest => self.ingest_count += 1,
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self {
            success: self.success + other.success,
            timeouts: self.timeouts + other.timeouts,
            provider_errors: self.provider_errors + other.provider_errors,
            cancelled: self.cancelled + other.cancelled,
            errors: self.errors + other.errors,
            ingest_count: self.ingest_count + other.ingest_count,
        }
    }

    /// Processed jobs, i.e. every terminal outcome. Ingests are not runs.
    pub fn total_runs(&self) -> i64 {
        self.success + self.timeouts + self.provider_errors + self.cancelled + self.errors
    }
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsMetric {
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub counters: StatsCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub total_runs: i64,
    #[serde(flatten)]
    pub counters: StatsCounters,
}

/// Time series for one window plus its summed counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsAggregation {
    pub window: StatsWindow,
    pub metrics: Vec<StatsMetric>,
    pub summary: StatsSummary,
}

impl StatsAggregation {
    pub fn from_metrics(window: StatsWindow, metrics: Vec<StatsMetric>) -> Self {
        let total = metrics
            .iter()
            .fold(StatsCounters::default(), |acc, m| acc.add(&m.counters));
        Self {
            window,
            metrics,
            summary: StatsSummary {
                total_runs: total.total_runs(),
                counters: total,
            },
        }
    }
}

/// A successfully completed job listed on a slot's dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentResult {
    pub job_id: JobId,
    pub slot_id: String,
    pub finalized_at: Timestamp,
    pub result_file_path: Option<String>,
    pub result_mime_type: Option<String>,
    pub result_size_bytes: Option<i64>,
    pub result_expires_at: Option<Timestamp>,
}
