//! AdapterPool - per-adapter-id pool of reusable connections
//!
//! Each pool keeps two FIFO queues of idle handles (inbound/outbound),
//! atomic live counters, and a shutdown guard. Handle creation is bounded
//! both by the per-pool max and by the manager's global capacity semaphore;
//! every created handle holds exactly one global permit until destroyed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info, warn};

use tl_common::{AdapterCategory, AdapterConfig, Direction, PoolStats};
use tl_config::PoolConfig;

use crate::adapter::{Adapter, AdapterFactory};
use crate::error::PoolError;
use crate::Result;

/// Attempts at finding/creating a handle that passes validation before the
/// pool is declared unhealthy.
const MAX_VALIDATION_ATTEMPTS: u32 = 3;

/// One live adapter instance owned by a pool.
///
/// At most one caller holds a handle borrowed at a time; the pool enforces
/// this by moving handles out of the idle queues on borrow.
pub struct PooledAdapter {
    adapter: Box<dyn Adapter>,
    direction: Direction,
    borrowed: bool,
    reusable: bool,
    created_at: Instant,
    last_used: Instant,
    /// Global capacity permit, held for the handle's whole lifetime and
    /// released when the handle is dropped.
    _permit: OwnedSemaphorePermit,
}

impl PooledAdapter {
    fn new(adapter: Box<dyn Adapter>, direction: Direction, permit: OwnedSemaphorePermit) -> Self {
        let now = Instant::now();
        Self {
            adapter,
            direction,
            borrowed: false,
            reusable: true,
            created_at: now,
            last_used: now,
            _permit: permit,
        }
    }

    /// Close the underlying adapter, consuming the handle. The global
    /// permit is released on drop. Used when a handle comes back for a
    /// pool that no longer exists.
    pub async fn close(mut self) {
        self.adapter.close().await;
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_borrowed(&self) -> bool {
        self.borrowed
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Mark this handle as unfit for reuse; it is destroyed on return
    /// instead of going back to the idle queue.
    pub fn mark_defective(&mut self) {
        self.reusable = false;
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

impl std::fmt::Debug for PooledAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledAdapter")
            .field("direction", &self.direction)
            .field("borrowed", &self.borrowed)
            .field("reusable", &self.reusable)
            .field("idle_for", &self.idle_for())
            .finish()
    }
}

/// Pool sizing derived from the adapter category.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizePolicy {
    pub base: u32,
    pub max: u32,
}

impl PoolSizePolicy {
    /// Base size keyed by category, hard max = min(2 * base, per-pool ceiling).
    pub fn for_category(category: AdapterCategory, cfg: &PoolConfig) -> Self {
        let base = match category {
            AdapterCategory::Database => cfg.base_size_database,
            AdapterCategory::FileTransfer => cfg.base_size_file,
            _ => cfg.base_size_default,
        };
        Self {
            base,
            max: (2 * base).min(cfg.max_per_pool),
        }
    }
}

/// Per-adapter-id connection pool.
pub struct AdapterPool {
    config: AdapterConfig,
    policy: PoolSizePolicy,

    idle_inbound: Mutex<VecDeque<PooledAdapter>>,
    idle_outbound: Mutex<VecDeque<PooledAdapter>>,

    /// Handles currently out with a caller.
    active: AtomicU32,
    /// Handles created and not yet destroyed (active + idle).
    total: AtomicU32,

    /// Shutdown excludes concurrent borrows/returns: those take the read
    /// side, shutdown takes the write side.
    shut_down: RwLock<bool>,

    /// Wake borrowers waiting for a handle or freed capacity. One Notify
    /// per direction so an inbound return never wakes an outbound waiter
    /// that cannot use it.
    returned_inbound: Notify,
    returned_outbound: Notify,

    factory: Arc<dyn AdapterFactory>,
    global: Arc<Semaphore>,

    borrow_timeout: Duration,
    idle_timeout: Duration,
}

impl AdapterPool {
    pub fn new(
        config: AdapterConfig,
        policy: PoolSizePolicy,
        factory: Arc<dyn AdapterFactory>,
        global: Arc<Semaphore>,
        borrow_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        info!(
            adapter_id = %config.id,
            category = ?config.category,
            base = policy.base,
            max = policy.max,
            "Creating adapter pool"
        );
        Self {
            config,
            policy,
            idle_inbound: Mutex::new(VecDeque::new()),
            idle_outbound: Mutex::new(VecDeque::new()),
            active: AtomicU32::new(0),
            total: AtomicU32::new(0),
            shut_down: RwLock::new(false),
            returned_inbound: Notify::new(),
            returned_outbound: Notify::new(),
            factory,
            global,
            borrow_timeout,
            idle_timeout,
        }
    }

    pub fn adapter_id(&self) -> &str {
        &self.config.id
    }

    pub fn max_size(&self) -> u32 {
        self.policy.max
    }

    fn idle_queue(&self, direction: Direction) -> &Mutex<VecDeque<PooledAdapter>> {
        match direction {
            Direction::Inbound => &self.idle_inbound,
            Direction::Outbound => &self.idle_outbound,
        }
    }

    fn pop_idle(&self, direction: Direction) -> Option<PooledAdapter> {
        self.idle_queue(direction).lock().pop_front()
    }

    fn returned(&self, direction: Direction) -> &Notify {
        match direction {
            Direction::Inbound => &self.returned_inbound,
            Direction::Outbound => &self.returned_outbound,
        }
    }

    /// Atomically reserve one slot in the pool's total, or report the pool
    /// full. Pairing the reservation with the increment closes the window
    /// where two concurrent borrows both see room for one more handle.
    fn try_claim_slot(&self) -> bool {
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < self.policy.max).then_some(total + 1)
            })
            .is_ok()
    }

    /// Give back a reserved (or vacated) slot and wake waiters in both
    /// directions, since freed capacity can serve either.
    fn release_slot(&self) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.returned_inbound.notify_one();
        self.returned_outbound.notify_one();
    }

    /// Borrow a live, validated handle.
    ///
    /// Pops an idle handle if present; otherwise creates one when below the
    /// per-pool max (consuming a global permit); otherwise waits up to the
    /// borrow timeout for a return. A handle that fails validation is
    /// destroyed and a replacement sought, capped at a small fixed number of
    /// attempts before the pool is reported unhealthy.
    pub async fn borrow(&self, direction: Direction) -> Result<PooledAdapter> {
        for attempt in 1..=MAX_VALIDATION_ATTEMPTS {
            let mut handle = self.acquire(direction).await?;

            if handle.adapter.validate().await {
                handle.borrowed = true;
                handle.touch();
                debug!(
                    adapter_id = %self.config.id,
                    direction = %direction,
                    "Borrowed adapter handle"
                );
                return Ok(handle);
            }

            warn!(
                adapter_id = %self.config.id,
                direction = %direction,
                attempt = attempt,
                max_attempts = MAX_VALIDATION_ATTEMPTS,
                "Adapter handle failed validation, destroying and retrying"
            );
            self.destroy_active(handle).await;
        }

        Err(PoolError::Unhealthy(self.config.id.clone()))
    }

    /// Obtain a handle by pop, create, or bounded wait. The handle counts as
    /// active from the moment it leaves the pool, so a validation failure in
    /// `borrow` must go through `destroy_active`.
    async fn acquire(&self, direction: Direction) -> Result<PooledAdapter> {
        {
            let shut = self.shut_down.read().await;
            if *shut {
                return Err(PoolError::ShutDown(self.config.id.clone()));
            }

            if let Some(handle) = self.pop_idle(direction) {
                self.active.fetch_add(1, Ordering::SeqCst);
                return Ok(handle);
            }

            if self.try_claim_slot() {
                return self.create_handle(direction).await;
            }
        }
        // Read guard dropped here so a shutdown is not blocked for the
        // whole borrow-timeout wait.

        let deadline = Instant::now() + self.borrow_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout(self.config.id.clone()));
            }

            if tokio::time::timeout(remaining, self.returned(direction).notified())
                .await
                .is_err()
            {
                debug!(
                    adapter_id = %self.config.id,
                    direction = %direction,
                    waited_ms = self.borrow_timeout.as_millis() as u64,
                    "Borrow timed out waiting for a returned handle"
                );
                return Err(PoolError::Timeout(self.config.id.clone()));
            }

            let shut = self.shut_down.read().await;
            if *shut {
                return Err(PoolError::ShutDown(self.config.id.clone()));
            }
            if let Some(handle) = self.pop_idle(direction) {
                self.active.fetch_add(1, Ordering::SeqCst);
                return Ok(handle);
            }
            // A destroy may have freed capacity instead of returning a handle
            if self.try_claim_slot() {
                return self.create_handle(direction).await;
            }
        }
    }

    /// Create a fresh handle against a slot the caller already claimed.
    /// Consumes one global permit, which travels with the handle and is
    /// released when the handle drops. Both the slot and the permit are
    /// given back if the factory fails.
    async fn create_handle(&self, direction: Direction) -> Result<PooledAdapter> {
        let permit = match self.global.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.release_slot();
                return Err(PoolError::ResourceExhausted);
            }
        };

        match self.factory.create(&self.config, direction).await {
            Ok(adapter) => {
                self.active.fetch_add(1, Ordering::SeqCst);
                debug!(
                    adapter_id = %self.config.id,
                    direction = %direction,
                    total = self.total.load(Ordering::SeqCst),
                    "Created adapter handle"
                );
                Ok(PooledAdapter::new(adapter, direction, permit))
            }
            Err(e) => {
                drop(permit);
                self.release_slot();
                warn!(
                    adapter_id = %self.config.id,
                    direction = %direction,
                    error = %e,
                    "Adapter creation failed"
                );
                Err(e)
            }
        }
    }

    /// Return a previously borrowed handle.
    ///
    /// Destroyed instead of pooled when the pool has shut down or the caller
    /// marked the handle defective.
    pub async fn give_back(&self, mut handle: PooledAdapter) {
        let shut = self.shut_down.read().await;
        if *shut || !handle.reusable {
            drop(shut);
            self.destroy_active(handle).await;
            return;
        }

        handle.borrowed = false;
        handle.touch();
        let direction = handle.direction;
        self.idle_queue(direction).lock().push_back(handle);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.returned(direction).notify_one();
    }

    /// Destroy a handle that is currently counted active.
    async fn destroy_active(&self, handle: PooledAdapter) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.destroy(handle).await;
    }

    /// Destroy a handle. Best effort: close errors are the adapter's to
    /// log, never ours to throw.
    async fn destroy(&self, mut handle: PooledAdapter) {
        handle.adapter.close().await;
        // Release the global permit before waking waiters
        drop(handle);
        self.release_slot();
    }

    /// Background pass: validate idle handles, destroying any that fail.
    pub async fn validate_idle(&self) -> u32 {
        let mut destroyed = 0;
        for direction in [Direction::Inbound, Direction::Outbound] {
            let drained: Vec<PooledAdapter> = {
                let mut queue = self.idle_queue(direction).lock();
                queue.drain(..).collect()
            };

            for handle in drained {
                if handle.adapter.validate().await {
                    self.idle_queue(direction).lock().push_back(handle);
                } else {
                    debug!(
                        adapter_id = %self.config.id,
                        direction = %direction,
                        "Evicting idle handle that failed validation"
                    );
                    self.destroy(handle).await;
                    destroyed += 1;
                }
            }
        }
        destroyed
    }

    /// Background pass: destroy idle handles past the idle timeout.
    pub async fn evict_idle(&self) -> u32 {
        let mut destroyed = 0;
        for direction in [Direction::Inbound, Direction::Outbound] {
            let (keep, stale): (Vec<_>, Vec<_>) = {
                let mut queue = self.idle_queue(direction).lock();
                queue
                    .drain(..)
                    .partition(|h| h.idle_for() < self.idle_timeout)
            };

            {
                let mut queue = self.idle_queue(direction).lock();
                queue.extend(keep);
            }

            for handle in stale {
                debug!(
                    adapter_id = %self.config.id,
                    direction = %direction,
                    idle_secs = handle.idle_for().as_secs(),
                    "Evicting idle handle past idle timeout"
                );
                self.destroy(handle).await;
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Mark the pool closed and destroy all idle handles. Future borrows
    /// fail; borrowed handles are destroyed when they come back.
    pub async fn shutdown(&self) {
        {
            let mut shut = self.shut_down.write().await;
            if *shut {
                return;
            }
            *shut = true;
        }

        info!(adapter_id = %self.config.id, "Shutting down adapter pool");

        for direction in [Direction::Inbound, Direction::Outbound] {
            let drained: Vec<PooledAdapter> = {
                let mut queue = self.idle_queue(direction).lock();
                queue.drain(..).collect()
            };
            for handle in drained {
                self.destroy(handle).await;
            }
        }
    }

    pub async fn is_shut_down(&self) -> bool {
        *self.shut_down.read().await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            adapter_id: self.config.id.clone(),
            idle_inbound: self.idle_inbound.lock().len() as u32,
            idle_outbound: self.idle_outbound.lock().len() as u32,
            active: self.active.load(Ordering::SeqCst),
            max_size: self.policy.max,
            // Synchronous best-effort read; the async accessor is authoritative
            shut_down: self.shut_down.try_read().map(|g| *g).unwrap_or(false),
        }
    }
}
