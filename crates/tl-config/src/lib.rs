//! Trunkline Configuration System
//!
//! TOML-based configuration with environment variable override support.
//! Every section has complete defaults so a config file is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub deadletter: DeadLetterConfig,
    pub error_counter: ErrorCounterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            deadletter: DeadLetterConfig::default(),
            error_counter: ErrorCounterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_rate_threshold <= 0.0 || self.breaker.failure_rate_threshold > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "breaker.failure_rate_threshold must be in (0, 1], got {}",
                self.breaker.failure_rate_threshold
            )));
        }
        if self.breaker.minimum_calls > self.breaker.sliding_window_size {
            return Err(ConfigError::ValidationError(format!(
                "breaker.minimum_calls ({}) exceeds sliding_window_size ({})",
                self.breaker.minimum_calls, self.breaker.sliding_window_size
            )));
        }
        if self.pool.max_global == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_global must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Adapter pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Base pool size for database-like adapters
    pub base_size_database: u32,
    /// Base pool size for file/FTP-like adapters
    pub base_size_file: u32,
    /// Base pool size for everything else
    pub base_size_default: u32,
    /// Hard per-pool ceiling (pool max = min(2 * base, this))
    pub max_per_pool: u32,
    /// Global cap on live adapter handles across all pools
    pub max_global: usize,
    /// Idle handles older than this are evicted
    pub idle_timeout_secs: u64,
    /// Background validation pass cadence
    pub validation_interval_secs: u64,
    /// Background idle-eviction pass cadence
    pub eviction_interval_secs: u64,
    /// How long a borrow waits for a returned handle before timing out
    pub borrow_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_size_database: 10,
            base_size_file: 2,
            base_size_default: 5,
            max_per_pool: 20,
            max_global: 100,
            idle_timeout_secs: 300,
            validation_interval_secs: 60,
            eviction_interval_secs: 60,
            borrow_timeout_secs: 5,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure rate (0..1] at which the breaker opens
    pub failure_rate_threshold: f64,
    /// Number of recent call outcomes kept per flow
    pub sliding_window_size: u32,
    /// Minimum recorded calls before the rate is evaluated
    pub minimum_calls: u32,
    /// How long an open breaker waits before admitting a trial call
    pub open_wait_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sliding_window_size: 10,
            minimum_calls: 5,
            open_wait_secs: 30,
        }
    }
}

/// Retry configuration (global default; flows may carry overrides)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl From<&RetryConfig> for tl_common::RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Dead letter queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Sweep cadence for re-driving pending messages
    pub sweep_interval_secs: u64,
    /// Retries before a message is permanently failed
    pub max_retries: u32,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            max_retries: 3,
        }
    }
}

/// Rolling error counter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCounterConfig {
    /// Counter reset cadence
    pub reset_interval_secs: u64,
    /// Advisory alert fires once the per-flow count crosses this
    pub alert_threshold: u32,
}

impl Default for ErrorCounterConfig {
    fn default() -> Self {
        Self {
            reset_interval_secs: 3_600,
            alert_threshold: 10,
        }
    }
}
