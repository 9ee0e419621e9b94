//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "trunkline.toml",
    "config.toml",
    "./config/trunkline.toml",
    "/etc/trunkline/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("TRUNKLINE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Pool
        if let Ok(val) = env::var("TRUNKLINE_POOL_MAX_GLOBAL") {
            if let Ok(max) = val.parse() {
                config.pool.max_global = max;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_POOL_MAX_PER_POOL") {
            if let Ok(max) = val.parse() {
                config.pool.max_per_pool = max;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_POOL_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.pool.idle_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_POOL_VALIDATION_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.pool.validation_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_POOL_BORROW_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.pool.borrow_timeout_secs = secs;
            }
        }

        // Breaker
        if let Ok(val) = env::var("TRUNKLINE_BREAKER_FAILURE_RATE_THRESHOLD") {
            if let Ok(rate) = val.parse() {
                config.breaker.failure_rate_threshold = rate;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_BREAKER_SLIDING_WINDOW_SIZE") {
            if let Ok(size) = val.parse() {
                config.breaker.sliding_window_size = size;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_BREAKER_MINIMUM_CALLS") {
            if let Ok(calls) = val.parse() {
                config.breaker.minimum_calls = calls;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_BREAKER_OPEN_WAIT_SECS") {
            if let Ok(secs) = val.parse() {
                config.breaker.open_wait_secs = secs;
            }
        }

        // Retry
        if let Ok(val) = env::var("TRUNKLINE_RETRY_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                config.retry.max_attempts = attempts;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_RETRY_BASE_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.base_delay_ms = ms;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_RETRY_MULTIPLIER") {
            if let Ok(mult) = val.parse() {
                config.retry.multiplier = mult;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_RETRY_MAX_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.max_delay_ms = ms;
            }
        }

        // Dead letter
        if let Ok(val) = env::var("TRUNKLINE_DEADLETTER_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.deadletter.sweep_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_DEADLETTER_MAX_RETRIES") {
            if let Ok(retries) = val.parse() {
                config.deadletter.max_retries = retries;
            }
        }

        // Error counter
        if let Ok(val) = env::var("TRUNKLINE_ERROR_COUNTER_RESET_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.error_counter.reset_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("TRUNKLINE_ERROR_COUNTER_ALERT_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                config.error_counter.alert_threshold = threshold;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
