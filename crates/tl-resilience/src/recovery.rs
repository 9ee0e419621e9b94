//! Recovery strategy selection and execution.
//!
//! Maps a classified error to a remediation action and runs it through
//! caller-supplied hooks. The hooks own the actual mechanics (tearing down
//! connections, restarting adapters); this module owns the decision.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use tl_common::{Alert, AlertChannel, AlertSeverity, ErrorKind};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::notifier::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    ResetConnection,
    RestartAdapter,
    Reconfigure,
    ClearCache,
    Retry,
    ManualIntervention,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryAction::ResetConnection => "RESET_CONNECTION",
            RecoveryAction::RestartAdapter => "RESTART_ADAPTER",
            RecoveryAction::Reconfigure => "RECONFIGURE",
            RecoveryAction::ClearCache => "CLEAR_CACHE",
            RecoveryAction::Retry => "RETRY",
            RecoveryAction::ManualIntervention => "MANUAL_INTERVENTION",
        };
        write!(f, "{}", s)
    }
}

/// Pick the remediation for a classified failure.
pub fn select_action(kind: ErrorKind, message: &str) -> RecoveryAction {
    match kind {
        ErrorKind::Connection | ErrorKind::Timeout => RecoveryAction::ResetConnection,
        ErrorKind::Adapter => RecoveryAction::RestartAdapter,
        ErrorKind::Configuration => RecoveryAction::Reconfigure,
        ErrorKind::System => {
            if message.to_ascii_lowercase().contains("cache") {
                RecoveryAction::ClearCache
            } else {
                RecoveryAction::ManualIntervention
            }
        }
        ErrorKind::Authentication | ErrorKind::Transformation | ErrorKind::Validation => {
            RecoveryAction::ManualIntervention
        }
        ErrorKind::Unknown => RecoveryAction::Retry,
    }
}

/// Remediation mechanics supplied by the embedding platform.
#[async_trait]
pub trait RecoveryHooks: Send + Sync {
    async fn reset_connection(&self, flow_id: &str) -> anyhow::Result<()>;
    async fn restart_adapter(&self, flow_id: &str) -> anyhow::Result<()>;
    async fn reconfigure(&self, flow_id: &str) -> anyhow::Result<()>;
    async fn clear_cache(&self, flow_id: &str) -> anyhow::Result<()>;
}

/// Hooks that do nothing. Selection and alerting still work.
pub struct NoopRecoveryHooks;

#[async_trait]
impl RecoveryHooks for NoopRecoveryHooks {
    async fn reset_connection(&self, _flow_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn restart_adapter(&self, _flow_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reconfigure(&self, _flow_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn clear_cache(&self, _flow_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct RecoveryCoordinator {
    hooks: Arc<dyn RecoveryHooks>,
    breakers: Arc<CircuitBreakerRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl RecoveryCoordinator {
    pub fn new(
        hooks: Arc<dyn RecoveryHooks>,
        breakers: Arc<CircuitBreakerRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            hooks,
            breakers,
            notifier,
        }
    }

    /// Select and execute the remediation for a failure, returning the
    /// action taken. Hook failures are logged; the chosen action is still
    /// reported so the caller knows what was attempted.
    pub async fn recover(&self, flow_id: &str, kind: ErrorKind, message: &str) -> RecoveryAction {
        let action = select_action(kind, message);
        info!(
            flow_id = %flow_id,
            kind = %kind,
            action = %action,
            "Executing recovery action"
        );

        let result = match action {
            RecoveryAction::ResetConnection => self.hooks.reset_connection(flow_id).await,
            RecoveryAction::RestartAdapter => {
                let result = self.hooks.restart_adapter(flow_id).await;
                // A restarted adapter deserves a clean slate
                self.breakers.reset(flow_id);
                result
            }
            RecoveryAction::Reconfigure => self.hooks.reconfigure(flow_id).await,
            RecoveryAction::ClearCache => self.hooks.clear_cache(flow_id).await,
            RecoveryAction::Retry => Ok(()),
            RecoveryAction::ManualIntervention => {
                let alert = Alert::new(
                    AlertSeverity::Critical,
                    AlertChannel::Log,
                    Some(flow_id.to_string()),
                    format!("Manual intervention required for {} failure: {}", kind, message),
                );
                self.notifier.notify(&alert).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(
                flow_id = %flow_id,
                action = %action,
                error = %e,
                "Recovery action failed"
            );
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerState;
    use crate::notifier::NoopNotifier;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tl_config::BreakerConfig;

    #[test]
    fn action_selection_by_kind() {
        assert_eq!(
            select_action(ErrorKind::Connection, ""),
            RecoveryAction::ResetConnection
        );
        assert_eq!(
            select_action(ErrorKind::Timeout, ""),
            RecoveryAction::ResetConnection
        );
        assert_eq!(
            select_action(ErrorKind::Adapter, ""),
            RecoveryAction::RestartAdapter
        );
        assert_eq!(
            select_action(ErrorKind::Configuration, ""),
            RecoveryAction::Reconfigure
        );
        assert_eq!(
            select_action(ErrorKind::System, "cache eviction storm"),
            RecoveryAction::ClearCache
        );
        assert_eq!(
            select_action(ErrorKind::System, "kernel panic"),
            RecoveryAction::ManualIntervention
        );
        assert_eq!(select_action(ErrorKind::Unknown, ""), RecoveryAction::Retry);
    }

    struct CountingHooks {
        restarts: AtomicU32,
    }

    #[async_trait]
    impl RecoveryHooks for CountingHooks {
        async fn reset_connection(&self, _flow_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn restart_adapter(&self, _flow_id: &str) -> anyhow::Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reconfigure(&self, _flow_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn clear_cache(&self, _flow_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_restart_resets_breaker() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default()));
        for _ in 0..5 {
            breakers.breaker_for("flow-1").record_failure();
        }
        assert_eq!(breakers.state_of("flow-1"), BreakerState::Open);

        let hooks = Arc::new(CountingHooks {
            restarts: AtomicU32::new(0),
        });
        let coordinator =
            RecoveryCoordinator::new(hooks.clone(), breakers.clone(), Arc::new(NoopNotifier));

        let action = coordinator
            .recover("flow-1", ErrorKind::Adapter, "adapter wedged")
            .await;

        assert_eq!(action, RecoveryAction::RestartAdapter);
        assert_eq!(hooks.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(breakers.state_of("flow-1"), BreakerState::Closed);
    }
}
