//! Per-flow circuit breaker.
//!
//! Tracks a sliding window of recent call outcomes. The breaker opens when
//! the window holds at least `minimum_calls` outcomes and the failure rate
//! meets the threshold, waits out `open_wait`, then admits exactly one trial
//! call. The trial's outcome decides between CLOSED and another OPEN period.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tl_config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct Inner {
    state: BreakerState,
    /// Most recent call outcomes, true = success. Bounded to the window size.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    flow_id: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(flow_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            flow_id: flow_id.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// An open breaker past its wait period moves to HALF_OPEN and admits
    /// the caller as the single trial; concurrent callers during the trial
    /// are refused.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let waited_out = inner
                    .opened_at
                    .map(|at| at.elapsed() >= Duration::from_secs(self.config.open_wait_secs))
                    .unwrap_or(true);
                if waited_out {
                    info!(flow_id = %self.flow_id, "Circuit breaker half-open, admitting trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                info!(flow_id = %self.flow_id, "Trial call succeeded, closing circuit breaker");
                inner.state = BreakerState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.trial_in_flight = false;
            }
            _ => {
                Self::push_outcome(&mut inner, true, self.config.sliding_window_size);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(flow_id = %self.flow_id, "Trial call failed, reopening circuit breaker");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.window.clear();
                inner.trial_in_flight = false;
            }
            _ => {
                Self::push_outcome(&mut inner, false, self.config.sliding_window_size);
                let rate = Self::failure_rate_of(&inner.window);
                if inner.state == BreakerState::Closed
                    && inner.window.len() as u32 >= self.config.minimum_calls
                    && rate >= self.config.failure_rate_threshold
                {
                    warn!(
                        flow_id = %self.flow_id,
                        failure_rate = rate,
                        threshold = self.config.failure_rate_threshold,
                        "Failure rate over threshold, opening circuit breaker"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    fn push_outcome(inner: &mut Inner, success: bool, window_size: u32) {
        inner.window.push_back(success);
        while inner.window.len() as u32 > window_size {
            inner.window.pop_front();
        }
    }

    fn failure_rate_of(window: &VecDeque<bool>) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        failures as f64 / window.len() as f64
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_rate(&self) -> f64 {
        Self::failure_rate_of(&self.inner.lock().window)
    }

    /// Force the breaker back to CLOSED, e.g. after an adapter restart.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        debug!(flow_id = %self.flow_id, "Resetting circuit breaker");
        inner.state = BreakerState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }
}

/// All breakers, keyed by flow id, created lazily with a shared config.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn breaker_for(&self, flow_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(flow_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(flow_id, self.config.clone()))
            })
            .value()
            .clone()
    }

    pub fn reset(&self, flow_id: &str) {
        if let Some(breaker) = self.breakers.get(flow_id) {
            breaker.reset();
        }
    }

    pub fn state_of(&self, flow_id: &str) -> BreakerState {
        self.breakers
            .get(flow_id)
            .map(|b| b.state())
            .unwrap_or(BreakerState::Closed)
    }

    pub fn all_states(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 10,
            minimum_calls: 5,
            open_wait_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_after_minimum_calls() {
        let breaker = CircuitBreaker::new("flow-1", test_config());

        // 2 successes, 2 failures: only 4 calls, stays closed
        breaker.record_success();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        // 5th call fails: 3/5 = 60% >= 50%, opens
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn below_minimum_calls_never_opens() {
        let breaker = CircuitBreaker::new("flow-1", test_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn admits_exactly_one_trial_after_wait() {
        let breaker = CircuitBreaker::new("flow-1", test_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());

        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Second caller during the trial is refused
        assert!(!breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes() {
        let breaker = CircuitBreaker::new("flow-1", test_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.try_acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_rate(), 0.0);
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens() {
        let breaker = CircuitBreaker::new("flow-1", test_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.try_acquire());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());

        // A fresh wait period admits another trial
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let config = BreakerConfig {
            sliding_window_size: 4,
            minimum_calls: 4,
            ..test_config()
        };
        let breaker = CircuitBreaker::new("flow-1", config);

        // Old failures fall out of a size-4 window as successes arrive
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.failure_rate(), 0.0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_keys_by_flow() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..5 {
            registry.breaker_for("noisy").record_failure();
        }
        registry.breaker_for("quiet").record_success();

        assert_eq!(registry.state_of("noisy"), BreakerState::Open);
        assert_eq!(registry.state_of("quiet"), BreakerState::Closed);

        registry.reset("noisy");
        assert_eq!(registry.state_of("noisy"), BreakerState::Closed);
    }
}
