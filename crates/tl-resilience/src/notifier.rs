//! Pluggable alert delivery.
//!
//! Real channels (email, webhook, SMS) live outside this crate; the default
//! notifier writes alerts to the log so nothing is silently dropped.

use async_trait::async_trait;
use tracing::{error, info, warn};

use tl_common::{Alert, AlertSeverity};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Writes each alert to the structured log at a level matching its severity.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) {
        let flow = alert.flow_id.as_deref().unwrap_or("-");
        match alert.severity {
            AlertSeverity::Info => {
                info!(alert_id = %alert.id, flow_id = %flow, channel = ?alert.channel, "{}", alert.message)
            }
            AlertSeverity::Warn => {
                warn!(alert_id = %alert.id, flow_id = %flow, channel = ?alert.channel, "{}", alert.message)
            }
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(alert_id = %alert.id, flow_id = %flow, channel = ?alert.channel, "{}", alert.message)
            }
        }
    }
}

/// Discards alerts. Useful in tests and embedded setups.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _alert: &Alert) {}
}
