//! Event type names published on the event bus for job lifecycle changes.
//!
//! The ingest gateway waits on these to answer synchronous callers.

/// Job was accepted into the queue.
pub const EVENT_JOB_ENQUEUED: &str = "job.enqueued";

/// Job finalized with a result.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// Job finalized with a provider or validation failure.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// Job finalized because its deadline passed.
pub const EVENT_JOB_TIMED_OUT: &str = "job.timed_out";

/// Job was cancelled (by an administrator or worker shutdown).
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";

/// Whether `event_type` marks a terminal transition.
pub fn is_terminal(event_type: &str) -> bool {
    matches!(
        event_type,
        EVENT_JOB_COMPLETED | EVENT_JOB_FAILED | EVENT_JOB_TIMED_OUT | EVENT_JOB_CANCELLED
    )
}
