use thiserror::Error;
use tl_common::ErrorKind;

#[derive(Error, Debug)]
pub enum ResilienceError {
    /// The flow's breaker is open; the operation was never invoked.
    #[error("Circuit breaker open for flow {0}")]
    BreakerOpen(String),

    /// The operation failed on every allowed attempt.
    #[error("Retries exhausted for flow {flow_id} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        flow_id: String,
        attempts: u32,
        last_error: String,
    },

    /// A terminal operation failure that was not eligible for retry.
    #[error("Operation failed ({kind}): {message}")]
    Operation { kind: ErrorKind, message: String },

    #[error("Store error: {0}")]
    Store(String),
}

impl ResilienceError {
    /// The classified kind of the underlying failure, where one exists.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::Operation { kind, .. } => *kind,
            ResilienceError::RetriesExhausted { last_error, .. } => {
                crate::classify::classify_message(last_error)
            }
            ResilienceError::BreakerOpen(_) => ErrorKind::System,
            ResilienceError::Store(_) => ErrorKind::System,
        }
    }
}
