//! ErrorHandlingService - the resilience front door.
//!
//! Composes the per-flow circuit breaker with per-flow retry around an
//! operation, persists failure records, keeps rolling per-flow error
//! counters, and raises advisory alerts when a flow gets noisy.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use tl_common::{
    Alert, AlertChannel, AlertSeverity, ErrorRecord, FlowErrorStats, RetryPolicy,
};
use tl_config::{AppConfig, ErrorCounterConfig};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::error::ResilienceError;
use crate::notifier::Notifier;
use crate::retry::RetryExecutor;
use crate::Result;

/// Append-only persistence for failure records.
#[async_trait::async_trait]
pub trait ErrorStore: Send + Sync {
    async fn append(&self, record: ErrorRecord) -> Result<()>;
    async fn records_since(
        &self,
        flow_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ErrorRecord>>;
}

#[derive(Default)]
pub struct InMemoryErrorStore {
    records: Mutex<Vec<ErrorRecord>>,
}

impl InMemoryErrorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ErrorStore for InMemoryErrorStore {
    async fn append(&self, record: ErrorRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn records_since(
        &self,
        flow_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ErrorRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.flow_id == flow_id && r.occurred_at >= since)
            .cloned()
            .collect())
    }
}

pub struct ErrorHandlingService {
    breakers: Arc<CircuitBreakerRegistry>,
    default_policy: RetryPolicy,
    policy_overrides: DashMap<String, RetryPolicy>,
    store: Arc<dyn ErrorStore>,
    notifier: Arc<dyn Notifier>,
    counters: DashMap<String, u32>,
    counter_config: ErrorCounterConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl ErrorHandlingService {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        default_policy: RetryPolicy,
        store: Arc<dyn ErrorStore>,
        notifier: Arc<dyn Notifier>,
        counter_config: ErrorCounterConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            breakers,
            default_policy,
            policy_overrides: DashMap::new(),
            store,
            notifier,
            counters: DashMap::new(),
            counter_config,
            shutdown_tx,
        }
    }

    /// Build the service from the application config, wiring the breaker,
    /// retry and counter sections into their runtime counterparts.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ErrorStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(
            Arc::new(CircuitBreakerRegistry::new(config.breaker.clone())),
            RetryPolicy::from(&config.retry),
            store,
            notifier,
            config.error_counter.clone(),
        )
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Install a per-flow retry policy overriding the global default.
    pub fn set_retry_policy(&self, flow_id: impl Into<String>, policy: RetryPolicy) {
        self.policy_overrides.insert(flow_id.into(), policy);
    }

    fn policy_for(&self, flow_id: &str) -> RetryPolicy {
        self.policy_overrides
            .get(flow_id)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Run an operation under the flow's breaker and retry policy.
    ///
    /// An open breaker fails fast without invoking the operation at all.
    /// The terminal outcome of the whole retry envelope counts as one
    /// entry in the breaker window.
    pub async fn execute_with_error_handling<T, F, Fut>(
        &self,
        flow_id: &str,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let breaker = self.breakers.breaker_for(flow_id);
        if !breaker.try_acquire() {
            debug!(flow_id = %flow_id, "Call refused, circuit breaker open");
            return Err(ResilienceError::BreakerOpen(flow_id.to_string()));
        }

        let executor = RetryExecutor::new(self.policy_for(flow_id));
        match executor.execute(flow_id, operation).await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                breaker.record_failure();
                self.record_failure(flow_id, &e).await;
                Err(e)
            }
        }
    }

    /// Retry without the breaker, with an explicit attempt cap.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        flow_id: &str,
        operation: F,
        max_retries: u32,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let policy = RetryPolicy {
            max_retries,
            ..self.policy_for(flow_id)
        };
        match RetryExecutor::new(policy).execute(flow_id, operation).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.record_failure(flow_id, &e).await;
                Err(e)
            }
        }
    }

    async fn record_failure(&self, flow_id: &str, error: &ResilienceError) {
        let kind = error.kind();
        let record = ErrorRecord::new(flow_id, kind, error.to_string());
        if let Err(store_err) = self.store.append(record).await {
            error!(flow_id = %flow_id, error = %store_err, "Failed to persist error record");
        }

        if let ResilienceError::RetriesExhausted { attempts, .. } = error {
            let alert = Alert::new(
                AlertSeverity::Error,
                AlertChannel::Log,
                Some(flow_id.to_string()),
                format!("Flow exhausted {} retry attempts", attempts),
            );
            self.notifier.notify(&alert).await;
        }

        let count = {
            let mut entry = self.counters.entry(flow_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        // Advisory only, fires once per counter window on the crossing
        if count == self.counter_config.alert_threshold + 1 {
            warn!(
                flow_id = %flow_id,
                count = count,
                threshold = self.counter_config.alert_threshold,
                "Flow error count over threshold"
            );
            let alert = Alert::new(
                AlertSeverity::Warn,
                AlertChannel::Log,
                Some(flow_id.to_string()),
                format!(
                    "Flow recorded {} errors within the current counter window",
                    count
                ),
            );
            self.notifier.notify(&alert).await;
        }
    }

    pub fn error_count(&self, flow_id: &str) -> u32 {
        self.counters.get(flow_id).map(|e| *e.value()).unwrap_or(0)
    }

    /// Per-flow observability snapshot: errors by kind over the last 24h,
    /// breaker state and failure rate.
    pub async fn error_stats(&self, flow_id: &str) -> Result<FlowErrorStats> {
        let since = Utc::now() - ChronoDuration::hours(24);
        let records = self.store.records_since(flow_id, since).await?;

        let mut errors_by_kind: HashMap<String, u64> = HashMap::new();
        for record in records {
            *errors_by_kind.entry(record.kind.to_string()).or_insert(0) += 1;
        }

        let breaker = self.breakers.breaker_for(flow_id);
        Ok(FlowErrorStats {
            flow_id: flow_id.to_string(),
            errors_by_kind,
            breaker_state: breaker.state().to_string(),
            failure_rate: breaker.failure_rate(),
        })
    }

    /// Spawn the periodic counter reset task. Stops on shutdown.
    pub fn start_counter_reset(self: &Arc<Self>) {
        let service = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = std::time::Duration::from_secs(self.counter_config.reset_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.reset_counters();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Error counter reset task stopping");
                        break;
                    }
                }
            }
        });
        info!(
            reset_interval_secs = self.counter_config.reset_interval_secs,
            alert_threshold = self.counter_config.alert_threshold,
            "Error counter reset task started"
        );
    }

    pub fn reset_counters(&self) {
        debug!(flows = self.counters.len(), "Resetting flow error counters");
        self.counters.clear();
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerState;
    use crate::notifier::NoopNotifier;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tl_config::BreakerConfig;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: 50,
        }
    }

    fn service() -> Arc<ErrorHandlingService> {
        Arc::new(ErrorHandlingService::new(
            Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default())),
            fast_policy(),
            Arc::new(InMemoryErrorStore::new()),
            Arc::new(NoopNotifier),
            ErrorCounterConfig::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn success_leaves_breaker_closed() {
        let service = service();
        let result = service
            .execute_with_error_handling("flow-1", || async { Ok::<_, anyhow::Error>(42) })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(service.breakers().state_of("flow-1"), BreakerState::Closed);
        assert_eq!(service.error_count("flow-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_recorded() {
        let service = service();
        let result: Result<()> = service
            .execute_with_error_handling("flow-1", || async {
                Err(anyhow::anyhow!("connection refused"))
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            ResilienceError::RetriesExhausted { .. }
        ));
        assert_eq!(service.error_count("flow-1"), 1);

        let stats = service.error_stats("flow-1").await.unwrap();
        assert_eq!(stats.errors_by_kind.get("CONNECTION"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_without_invoking() {
        let service = service();
        // Minimum calls for the default config is 5
        for _ in 0..5 {
            let _: Result<()> = service
                .execute_with_error_handling("flow-1", || async {
                    Err(anyhow::anyhow!("connection refused"))
                })
                .await;
        }
        assert_eq!(service.breakers().state_of("flow-1"), BreakerState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = service
            .execute_with_error_handling("flow-1", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), ResilienceError::BreakerOpen(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_flow_policy_override_applies() {
        let service = service();
        service.set_retry_policy(
            "flow-1",
            RetryPolicy {
                max_retries: 5,
                base_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 1,
            },
        );

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let _: Result<()> = service
            .execute_with_error_handling("flow-1", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("broker unreachable"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_retry_skips_breaker() {
        let service = service();
        // Open the breaker for this flow
        for _ in 0..5 {
            let _: Result<()> = service
                .execute_with_error_handling("flow-1", || async {
                    Err(anyhow::anyhow!("connection refused"))
                })
                .await;
        }
        assert_eq!(service.breakers().state_of("flow-1"), BreakerState::Open);

        // execute_with_retry still runs
        let result = service
            .execute_with_retry("flow-1", || async { Ok::<_, anyhow::Error>("ok") }, 1)
            .await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn from_config_applies_retry_section() {
        let mut config = tl_config::AppConfig::default();
        config.retry.max_attempts = 2;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        let service = ErrorHandlingService::from_config(
            &config,
            Arc::new(InMemoryErrorStore::new()),
            Arc::new(NoopNotifier),
        );

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let _: Result<()> = service
            .execute_with_error_handling("flow-1", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("connection refused"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_reset() {
        let service = service();
        let _: Result<()> = service
            .execute_with_error_handling("flow-1", || async {
                Err(anyhow::anyhow!("connection refused"))
            })
            .await;
        assert_eq!(service.error_count("flow-1"), 1);

        service.reset_counters();
        assert_eq!(service.error_count("flow-1"), 0);
    }
}
