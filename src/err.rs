//! Distinguished error conditions matched on across module boundaries.

/// Conditions the orchestration layer must tell apart from generic failures.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Cooperative cancellation was requested while streaming.
    #[error("operation cancelled")]
    Cancelled,
    /// The input file does not satisfy the format it claims.
    #[error("format error: {0}")]
    Format(String),
    /// An operation of the same kind is already in flight.
    #[error("another {0} is already running")]
    Busy(&'static str),
}

/// Returns whether the given error chain bottoms out in a cancellation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled))
}
