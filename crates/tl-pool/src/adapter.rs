//! Adapter capability traits
//!
//! The pool never knows how a connection talks to its peer. It creates
//! adapters through an injected factory and interacts with them only to
//! validate, categorize, and close.

use async_trait::async_trait;
use tl_common::{AdapterCategory, AdapterConfig, Direction};

use crate::error::PoolError;

/// One live protocol connection to an external system.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Check that the underlying connection is still usable.
    async fn validate(&self) -> bool;

    /// Release the underlying connection. Best effort: implementations log
    /// secondary failures and never propagate them.
    async fn close(&mut self);

    fn category(&self) -> AdapterCategory;
}

/// Constructs live adapter instances from configuration records.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(
        &self,
        config: &AdapterConfig,
        direction: Direction,
    ) -> Result<Box<dyn Adapter>, PoolError>;
}
