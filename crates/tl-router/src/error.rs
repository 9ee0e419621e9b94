use thiserror::Error;

/// Load-time router failures. Per-message failures are reported as
/// `RouteResult::Error` values instead so callers can branch without
/// exception handling.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Unknown router type: {0}")]
    UnknownType(String),

    #[error("Invalid router configuration: {0}")]
    InvalidConfig(String),
}
