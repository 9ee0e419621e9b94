//! Bounded retry with exponential backoff.

use std::future::Future;

use tracing::{debug, warn};

use tl_common::{ErrorKind, RetryPolicy};

use crate::classify::classify;
use crate::error::ResilienceError;

/// Runs an operation up to `policy.max_retries` times total, sleeping an
/// exponentially growing delay between attempts.
///
/// Validation-class failures are terminal on the spot; retrying a malformed
/// request never helps.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut>(
        &self,
        flow_id: &str,
        mut operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max = self.policy.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(flow_id = %flow_id, attempt = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let kind = classify(&e);
                    if kind == ErrorKind::Validation {
                        warn!(
                            flow_id = %flow_id,
                            error = %e,
                            "Validation failure is not retryable"
                        );
                        return Err(ResilienceError::Operation {
                            kind,
                            message: e.to_string(),
                        });
                    }

                    warn!(
                        flow_id = %flow_id,
                        attempt = attempt,
                        max_attempts = max,
                        kind = %kind,
                        error = %e,
                        "Operation attempt failed"
                    );
                    last_error = e.to_string();

                    if attempt < max {
                        tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(ResilienceError::RetriesExhausted {
            flow_id: flow_id.to_string(),
            attempts: max,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<u32, _> = executor
            .execute("flow-1", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_runs_exactly_max_times() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = executor
            .execute("flow-1", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("connection refused"))
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            ResilienceError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_and_caps() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_retries: 4,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 300,
        });

        let start = tokio::time::Instant::now();
        let _: Result<(), _> = executor
            .execute("flow-1", || async { Err(anyhow::anyhow!("nope")) })
            .await;

        // Sleeps: 100 + 200 + 300 (capped from 400)
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = executor
            .execute("flow-1", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("invalid message body"))
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            ResilienceError::Operation {
                kind: ErrorKind::Validation,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eventual_success_stops_retrying() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<&str, _> = executor
            .execute("flow-1", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow::anyhow!("connection reset"))
                    } else {
                        Ok("delivered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
