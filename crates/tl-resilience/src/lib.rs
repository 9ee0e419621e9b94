//! Trunkline Resilience Layer
//!
//! Wraps flow operations in a per-flow circuit breaker and bounded retry,
//! records failures, re-drives dead-lettered messages on a schedule, and
//! maps classified errors to recovery actions.

pub mod circuit_breaker;
pub mod classify;
pub mod dead_letter;
pub mod error;
pub mod notifier;
pub mod recovery;
pub mod retry;
pub mod service;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerRegistry};
pub use classify::classify_message;
pub use dead_letter::{
    DeadLetterService, DeadLetterStore, InMemoryDeadLetterStore, MessageRequeue,
};
pub use error::ResilienceError;
pub use notifier::{LogNotifier, NoopNotifier, Notifier};
pub use recovery::{NoopRecoveryHooks, RecoveryAction, RecoveryCoordinator, RecoveryHooks};
pub use retry::RetryExecutor;
pub use service::{ErrorHandlingService, ErrorStore, InMemoryErrorStore};

pub type Result<T> = std::result::Result<T, ResilienceError>;
