//! PoolManager - registry of adapter pools behind a global capacity bound
//!
//! Pools are created lazily on first borrow. A single counting semaphore
//! caps the total number of live handles across every pool, so one noisy
//! adapter cannot starve the rest of the platform of capacity.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info};

use tl_common::{AdapterConfig, Direction, PoolManagerStats};
use tl_config::PoolConfig;

use crate::adapter::AdapterFactory;
use crate::error::PoolError;
use crate::pool::{AdapterPool, PooledAdapter, PoolSizePolicy};
use crate::Result;

/// Intervals for the background maintenance tasks.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub validation_interval: Duration,
    pub eviction_interval: Duration,
}

impl MaintenanceConfig {
    pub fn from_pool_config(cfg: &PoolConfig) -> Self {
        Self {
            validation_interval: Duration::from_secs(cfg.validation_interval_secs),
            eviction_interval: Duration::from_secs(cfg.eviction_interval_secs),
        }
    }
}

pub struct PoolManager {
    config: PoolConfig,
    factory: Arc<dyn AdapterFactory>,
    global: Arc<Semaphore>,

    pools: DashMap<String, Arc<AdapterPool>>,
    adapters: DashMap<String, AdapterConfig>,

    shutdown_tx: broadcast::Sender<()>,
}

impl PoolManager {
    pub fn new(config: PoolConfig, factory: Arc<dyn AdapterFactory>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let global = Arc::new(Semaphore::new(config.max_global));
        info!(
            max_global = config.max_global,
            max_per_pool = config.max_per_pool,
            "Pool manager initialized"
        );
        Self {
            config,
            factory,
            global,
            pools: DashMap::new(),
            adapters: DashMap::new(),
            shutdown_tx,
        }
    }

    /// Register an adapter definition. Borrows against an unregistered id
    /// fail with `UnknownAdapter`.
    pub fn register_adapter(&self, config: AdapterConfig) {
        debug!(adapter_id = %config.id, type_name = %config.type_name, "Registered adapter");
        self.adapters.insert(config.id.clone(), config);
    }

    pub fn registered_adapters(&self) -> Vec<String> {
        self.adapters.iter().map(|e| e.key().clone()).collect()
    }

    /// Borrow a handle for the given adapter id, creating the pool on first
    /// use.
    pub async fn borrow(&self, adapter_id: &str, direction: Direction) -> Result<PooledAdapter> {
        let pool = self.pool_for(adapter_id)?;
        pool.borrow(direction).await
    }

    /// Return a handle to its pool. A handle whose pool has since been
    /// removed is closed here so its global permit still comes back.
    pub async fn give_back(&self, adapter_id: &str, handle: PooledAdapter) {
        match self.pools.get(adapter_id).map(|e| e.value().clone()) {
            Some(pool) => pool.give_back(handle).await,
            None => {
                debug!(
                    adapter_id = %adapter_id,
                    "Handle returned for a removed pool, destroying it"
                );
                handle.close().await;
            }
        }
    }

    fn pool_for(&self, adapter_id: &str) -> Result<Arc<AdapterPool>> {
        if let Some(pool) = self.pools.get(adapter_id) {
            return Ok(pool.value().clone());
        }

        let config = self
            .adapters
            .get(adapter_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PoolError::UnknownAdapter(adapter_id.to_string()))?;

        let pool = self
            .pools
            .entry(adapter_id.to_string())
            .or_insert_with(|| {
                let policy = PoolSizePolicy::for_category(config.category, &self.config);
                Arc::new(AdapterPool::new(
                    config,
                    policy,
                    self.factory.clone(),
                    self.global.clone(),
                    Duration::from_secs(self.config.borrow_timeout_secs),
                    Duration::from_secs(self.config.idle_timeout_secs),
                ))
            })
            .value()
            .clone();
        Ok(pool)
    }

    /// Spawn the periodic validation and eviction tasks. Both stop on
    /// shutdown.
    pub fn start_maintenance(self: &Arc<Self>, maintenance: MaintenanceConfig) {
        let manager = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = maintenance.validation_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.validate_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Pool validation task stopping");
                        break;
                    }
                }
            }
        });

        let manager = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = maintenance.eviction_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.evict_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Pool eviction task stopping");
                        break;
                    }
                }
            }
        });

        info!(
            validation_interval_secs = maintenance.validation_interval.as_secs(),
            eviction_interval_secs = maintenance.eviction_interval.as_secs(),
            "Pool maintenance tasks started"
        );
    }

    async fn validate_all(&self) {
        let pools: Vec<Arc<AdapterPool>> =
            self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            let destroyed = pool.validate_idle().await;
            if destroyed > 0 {
                info!(
                    adapter_id = %pool.adapter_id(),
                    destroyed = destroyed,
                    "Validation pass destroyed broken idle handles"
                );
            }
        }
    }

    async fn evict_all(&self) {
        let pools: Vec<Arc<AdapterPool>> =
            self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            let destroyed = pool.evict_idle().await;
            if destroyed > 0 {
                debug!(
                    adapter_id = %pool.adapter_id(),
                    destroyed = destroyed,
                    "Eviction pass removed stale idle handles"
                );
            }
        }
    }

    /// Shut down every pool and stop the maintenance tasks.
    pub async fn shutdown(&self) {
        info!(pools = self.pools.len(), "Shutting down pool manager");
        if self.shutdown_tx.send(()).is_err() {
            debug!("No maintenance tasks were listening for shutdown");
        }

        let pools: Vec<Arc<AdapterPool>> =
            self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }

    /// Shut down and remove a single pool, e.g. when an adapter is
    /// reconfigured or restarted.
    pub async fn shutdown_pool(&self, adapter_id: &str) -> Result<()> {
        match self.pools.remove(adapter_id) {
            Some((_, pool)) => {
                pool.shutdown().await;
                Ok(())
            }
            None => {
                error!(adapter_id = %adapter_id, "Shutdown requested for unknown pool");
                Err(PoolError::UnknownAdapter(adapter_id.to_string()))
            }
        }
    }

    pub fn stats(&self) -> PoolManagerStats {
        let pools: Vec<_> = self.pools.iter().map(|e| e.value().stats()).collect();
        PoolManagerStats {
            pools,
            global_permits_available: self.global.available_permits(),
            max_global: self.config.max_global,
        }
    }
}
