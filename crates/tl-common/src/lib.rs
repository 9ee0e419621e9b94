use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Adapter Types
// ============================================================================

/// Direction of an adapter connection relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Adapter category, resolved once when the adapter configuration is loaded.
///
/// Drives pool sizing: database-like adapters hold more connections than
/// file-transfer ones, everything else gets the default base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterCategory {
    Database,
    Messaging,
    Http,
    Soap,
    FileTransfer,
    Other,
}

impl AdapterCategory {
    /// Map a configured adapter type string to its category.
    pub fn from_type_str(type_name: &str) -> Self {
        let t = type_name.to_ascii_uppercase();
        match t.as_str() {
            "JDBC" | "DATABASE" | "POSTGRES" | "MYSQL" | "ORACLE" | "MSSQL" => {
                AdapterCategory::Database
            }
            "JMS" | "AMQP" | "KAFKA" | "MQ" | "RABBITMQ" => AdapterCategory::Messaging,
            "HTTP" | "REST" | "WEBHOOK" => AdapterCategory::Http,
            "SOAP" | "WS" => AdapterCategory::Soap,
            "FILE" | "FTP" | "SFTP" | "FTPS" => AdapterCategory::FileTransfer,
            _ => AdapterCategory::Other,
        }
    }
}

/// Configuration record for one adapter, as read from the configuration store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub id: String,
    pub type_name: String,
    pub category: AdapterCategory,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl AdapterConfig {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let category = AdapterCategory::from_type_str(&type_name);
        Self {
            id: id.into(),
            type_name,
            category,
            properties: serde_json::Value::Null,
        }
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Classified error kind driving alert routing and recovery selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Connection,
    Authentication,
    Transformation,
    Validation,
    Timeout,
    Adapter,
    Configuration,
    System,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Connection,
        ErrorKind::Authentication,
        ErrorKind::Transformation,
        ErrorKind::Validation,
        ErrorKind::Timeout,
        ErrorKind::Adapter,
        ErrorKind::Configuration,
        ErrorKind::System,
        ErrorKind::Unknown,
    ];
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Transformation => "TRANSFORMATION",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Adapter => "ADAPTER",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::System => "SYSTEM",
            ErrorKind::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// One persisted failure occurrence for a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub flow_id: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Condensed stack / cause chain, best effort.
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(flow_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            kind,
            message: message.into(),
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// Dead Letter Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterStatus {
    /// Queued, waiting for the next sweep.
    Pending,
    /// Re-driven onto the inbound path at least once, still eligible.
    Retried,
    /// Retries exhausted, requires manual intervention.
    Failed,
}

/// A message a consumer explicitly deemed undeliverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: String,
    pub flow_id: String,
    pub message_id: String,
    pub payload: String,
    pub reason: String,
    pub retry_count: u32,
    pub status: DeadLetterStatus,
    pub queued_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl DeadLetterMessage {
    pub fn new(
        flow_id: impl Into<String>,
        message_id: impl Into<String>,
        payload: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            message_id: message_id.into(),
            payload: payload.into(),
            reason: reason.into(),
            retry_count: 0,
            status: DeadLetterStatus::Pending,
            queued_at: Utc::now(),
            last_retry_at: None,
        }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Per-flow retry policy, or the global default when no override exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of invocations, not additional attempts.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (attempts are 1-based).
    ///
    /// delay(i) = min(base * multiplier^(i-1), max)
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exp as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        std::time::Duration::from_millis(capped as u64)
    }
}

// ============================================================================
// Alerting Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertChannel {
    Email,
    Webhook,
    Sms,
    Log,
}

/// An operational alert raised by the resilience layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub channel: AlertChannel,
    pub flow_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        channel: AlertChannel,
        flow_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            channel,
            flow_id,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Observability Types
// ============================================================================

/// Snapshot of one adapter pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub adapter_id: String,
    pub idle_inbound: u32,
    pub idle_outbound: u32,
    pub active: u32,
    pub max_size: u32,
    pub shut_down: bool,
}

/// Snapshot of the whole pool manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolManagerStats {
    pub pools: Vec<PoolStats>,
    pub global_permits_available: usize,
    pub max_global: usize,
}

/// Per-flow error statistics for observability endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowErrorStats {
    pub flow_id: String,
    /// Errors in the last 24 hours grouped by kind.
    pub errors_by_kind: std::collections::HashMap<String, u64>,
    pub breaker_state: String,
    pub failure_rate: f64,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TrunklineError {
    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Resilience error: {0}")]
    Resilience(String),

    #[error("Router error: {0}")]
    Router(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, TrunklineError>;
