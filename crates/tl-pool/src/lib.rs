//! Trunkline Adapter Connection Pool
//!
//! This crate provides pooling of live protocol-adapter connections:
//! - PooledAdapter: one live adapter instance with borrow/last-used bookkeeping
//! - AdapterPool: per-adapter-id FIFO pool with directional idle queues
//! - PoolManager: owns all pools, the global capacity semaphore, and
//!   background validation/eviction tasks
//!
//! Adapters themselves (how an HTTP/JDBC/FTP connection talks to its peer)
//! live behind the `Adapter`/`AdapterFactory` traits.

pub mod adapter;
pub mod error;
pub mod manager;
pub mod pool;

pub use adapter::{Adapter, AdapterFactory};
pub use error::PoolError;
pub use manager::{MaintenanceConfig, PoolManager};
pub use pool::{AdapterPool, PoolSizePolicy, PooledAdapter};

pub type Result<T> = std::result::Result<T, PoolError>;
