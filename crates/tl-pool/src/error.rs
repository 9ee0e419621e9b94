use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Global adapter capacity exhausted")]
    ResourceExhausted,

    #[error("Timed out waiting for an adapter from pool [{0}]")]
    Timeout(String),

    #[error("Pool [{0}] is unhealthy: validation kept failing")]
    Unhealthy(String),

    #[error("Pool [{0}] is shut down")]
    ShutDown(String),

    #[error("No adapter configuration registered for [{0}]")]
    UnknownAdapter(String),

    #[error("Adapter creation failed: {0}")]
    Create(String),
}
