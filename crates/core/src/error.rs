/// Failures of the pure domain rules.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input that can never be accepted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Input that contradicts state or configuration it must agree with.
    #[error("Conflict: {0}")]
    Conflict(String),
}
