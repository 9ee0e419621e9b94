//! Dead letter queue with scheduled re-delivery.
//!
//! Messages a consumer explicitly deems undeliverable are persisted PENDING
//! and re-driven onto the inbound path by a periodic sweep. A message that
//! has used up its retries is marked FAILED and left for manual
//! intervention.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use tl_common::{Alert, AlertChannel, AlertSeverity, DeadLetterMessage, DeadLetterStatus};
use tl_config::DeadLetterConfig;

use crate::error::ResilienceError;
use crate::notifier::Notifier;
use crate::Result;

/// Persistence for dead letter messages.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, message: DeadLetterMessage) -> Result<()>;
    async fn update(&self, message: &DeadLetterMessage) -> Result<()>;
    /// Every message not yet permanently failed, oldest first.
    async fn eligible(&self) -> Result<Vec<DeadLetterMessage>>;
    async fn get(&self, id: &str) -> Result<Option<DeadLetterMessage>>;
}

/// Re-drives a dead-lettered payload onto the inbound message path.
#[async_trait]
pub trait MessageRequeue: Send + Sync {
    async fn requeue(&self, message: &DeadLetterMessage) -> anyhow::Result<()>;
}

/// In-memory store, the default when no persistence backend is wired in.
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    messages: DashMap<String, DeadLetterMessage>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(&self, message: DeadLetterMessage) -> Result<()> {
        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn update(&self, message: &DeadLetterMessage) -> Result<()> {
        match self.messages.get_mut(&message.id) {
            Some(mut entry) => {
                *entry = message.clone();
                Ok(())
            }
            None => Err(ResilienceError::Store(format!(
                "dead letter message {} not found",
                message.id
            ))),
        }
    }

    async fn eligible(&self) -> Result<Vec<DeadLetterMessage>> {
        let mut eligible: Vec<DeadLetterMessage> = self
            .messages
            .iter()
            .filter(|e| e.value().status != DeadLetterStatus::Failed)
            .map(|e| e.value().clone())
            .collect();
        eligible.sort_by_key(|m| m.queued_at);
        Ok(eligible)
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterMessage>> {
        Ok(self.messages.get(id).map(|e| e.value().clone()))
    }
}

pub struct DeadLetterService {
    store: Arc<dyn DeadLetterStore>,
    requeue: Arc<dyn MessageRequeue>,
    notifier: Arc<dyn Notifier>,
    config: DeadLetterConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl DeadLetterService {
    pub fn new(
        store: Arc<dyn DeadLetterStore>,
        requeue: Arc<dyn MessageRequeue>,
        notifier: Arc<dyn Notifier>,
        config: DeadLetterConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            requeue,
            notifier,
            config,
            shutdown_tx,
        }
    }

    /// Persist an undeliverable message and raise a warning alert.
    pub async fn send_to_dead_letter(
        &self,
        flow_id: &str,
        message_id: &str,
        payload: &str,
        reason: &str,
    ) -> Result<String> {
        let message = DeadLetterMessage::new(flow_id, message_id, payload, reason);
        let id = message.id.clone();
        warn!(
            flow_id = %flow_id,
            message_id = %message_id,
            reason = %reason,
            "Message sent to dead letter queue"
        );
        self.store.insert(message).await?;

        let alert = Alert::new(
            AlertSeverity::Warn,
            AlertChannel::Log,
            Some(flow_id.to_string()),
            format!("Message {} dead-lettered: {}", message_id, reason),
        );
        self.notifier.notify(&alert).await;
        Ok(id)
    }

    /// One sweep pass. Messages at their retry cap become FAILED; the rest
    /// are requeued with an incremented count.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        for mut message in self.store.eligible().await? {
            if message.retry_count >= self.config.max_retries {
                message.status = DeadLetterStatus::Failed;
                self.store.update(&message).await?;
                outcome.failed += 1;
                error!(
                    flow_id = %message.flow_id,
                    message_id = %message.message_id,
                    retry_count = message.retry_count,
                    "Dead letter retries exhausted, message permanently failed"
                );
                let alert = Alert::new(
                    AlertSeverity::Error,
                    AlertChannel::Log,
                    Some(message.flow_id.clone()),
                    format!(
                        "Dead letter message {} permanently failed after {} retries",
                        message.message_id, message.retry_count
                    ),
                );
                self.notifier.notify(&alert).await;
                continue;
            }

            match self.requeue.requeue(&message).await {
                Ok(()) => {
                    message.retry_count += 1;
                    message.status = DeadLetterStatus::Retried;
                    message.last_retry_at = Some(Utc::now());
                    self.store.update(&message).await?;
                    outcome.requeued += 1;
                    debug!(
                        flow_id = %message.flow_id,
                        message_id = %message.message_id,
                        retry_count = message.retry_count,
                        "Dead letter message requeued"
                    );
                }
                Err(e) => {
                    // Left as-is for the next sweep
                    outcome.requeue_errors += 1;
                    warn!(
                        flow_id = %message.flow_id,
                        message_id = %message.message_id,
                        error = %e,
                        "Dead letter requeue failed"
                    );
                }
            }
        }

        if outcome.requeued + outcome.failed + outcome.requeue_errors > 0 {
            info!(
                requeued = outcome.requeued,
                failed = outcome.failed,
                requeue_errors = outcome.requeue_errors,
                "Dead letter sweep finished"
            );
        }
        Ok(outcome)
    }

    /// Spawn the periodic sweep task. Stops on shutdown.
    pub fn start_sweeper(self: &Arc<Self>) {
        let service = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = std::time::Duration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.sweep().await {
                            error!(error = %e, "Dead letter sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Dead letter sweeper stopping");
                        break;
                    }
                }
            }
        });
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            max_retries = self.config.max_retries,
            "Dead letter sweeper started"
        );
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub requeued: u32,
    pub failed: u32,
    pub requeue_errors: u32,
}
