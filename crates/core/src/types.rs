/// Job identifiers are UUIDs (v7 for new jobs, so they sort by creation).
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Normalise an instant from any timezone to the canonical [`Timestamp`].
///
/// This is the only place timezone-aware values from outside the system
/// are converted; everything downstream compares `Timestamp`s directly.
pub fn to_utc<Tz: chrono::TimeZone>(instant: chrono::DateTime<Tz>) -> Timestamp {
    instant.with_timezone(&chrono::Utc)
}
