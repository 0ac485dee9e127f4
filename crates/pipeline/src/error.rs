use photochanger_core::error::CoreError;
use photochanger_core::types::JobId;

/// Failures of a [`JobQueue`](crate::queue::JobQueue).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Admission control rejected the job.
    #[error("queue is busy: {in_flight} of {max_in_flight} jobs in flight")]
    Busy { in_flight: i64, max_in_flight: i64 },

    /// The backing store could not be reached.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// A different terminal state was already persisted.
    #[error("job {0} is already finalized")]
    AlreadyFinalized(JobId),

    #[error("invalid job: {0}")]
    Invalid(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for StatsError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("invalid media path '{0}'")]
    InvalidPath(String),

    #[error("media '{0}' not found")]
    NotFound(String),

    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("media index error: {0}")]
    Index(String),
}

impl From<sqlx::Error> for MediaError {
    fn from(err: sqlx::Error) -> Self {
        Self::Index(err.to_string())
    }
}

/// Failures resolving a slot's template media.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template binding: {0}")]
    Binding(String),

    #[error("template media for role '{role}' not found")]
    Missing { role: String },

    #[error(transparent)]
    Media(#[from] MediaError),
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("slot store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for SlotError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Failures that abort a cleanup sweep before it started removing objects.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Failures of a worker cycle.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Slots(#[from] SlotError),

    /// The job settled but an audit entry could not be persisted.
    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("slot '{0}' not found")]
    SlotNotFound(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Slots(#[from] SlotError),
}

impl From<CoreError> for IngestError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}
