//! Process-scoped registry of live pools
//!
//! One `PoolHolder` per pool id, created at registration and kept for the life
//! of the process. The registry never creates or shuts down pools; it only
//! tracks the handle and the last applied configuration.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hp_common::PoolConfig;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::info;

use crate::error::PoolError;
use crate::pool::ReconfigurablePool;
use crate::Result;

/// A live pool and the configuration last applied to it
pub struct PoolHolder {
    pool_id: String,
    pool: Arc<dyn ReconfigurablePool>,
    config: RwLock<PoolConfig>,
    refresh_lock: Mutex<()>,
}

impl PoolHolder {
    fn new(pool_id: String, pool: Arc<dyn ReconfigurablePool>, config: PoolConfig) -> Self {
        Self {
            pool_id,
            pool,
            config: RwLock::new(config),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn pool(&self) -> &Arc<dyn ReconfigurablePool> {
        &self.pool
    }

    /// Snapshot of the stored configuration
    pub fn config(&self) -> PoolConfig {
        self.config.read().clone()
    }

    pub(crate) fn replace_config(&self, config: PoolConfig) {
        *self.config.write() = config;
    }

    /// Serializes reconfiguration of this pool. Held for a whole refresh.
    pub(crate) fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock()
    }
}

impl std::fmt::Debug for PoolHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHolder")
            .field("pool_id", &self.pool_id)
            .field("config", &*self.config.read())
            .finish()
    }
}

#[derive(Default)]
pub struct PoolRegistry {
    holders: DashMap<String, Arc<PoolHolder>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live pool under `pool_id`.
    ///
    /// Duplicate ids are rejected with `AlreadyRegistered`; the existing holder
    /// is left untouched.
    pub fn register(
        &self,
        pool_id: &str,
        pool: Arc<dyn ReconfigurablePool>,
        initial_config: PoolConfig,
    ) -> Result<Arc<PoolHolder>> {
        if initial_config.pool_id != pool_id {
            return Err(PoolError::InvalidConfig(format!(
                "config pool_id {} does not match registration id {}",
                initial_config.pool_id, pool_id
            )));
        }
        initial_config.validate().map_err(PoolError::InvalidConfig)?;

        match self.holders.entry(pool_id.to_string()) {
            Entry::Occupied(_) => Err(PoolError::AlreadyRegistered(pool_id.to_string())),
            Entry::Vacant(entry) => {
                info!(
                    pool_id = %pool_id,
                    core_size = initial_config.core_size,
                    max_size = initial_config.max_size,
                    queue_kind = %initial_config.queue_kind,
                    "Registered thread pool"
                );
                let holder = Arc::new(PoolHolder::new(pool_id.to_string(), pool, initial_config));
                entry.insert(holder.clone());
                Ok(holder)
            }
        }
    }

    pub fn lookup(&self, pool_id: &str) -> Result<Arc<PoolHolder>> {
        self.holders
            .get(pool_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PoolError::NotFound(pool_id.to_string()))
    }

    /// Replace the stored configuration of a registered pool.
    /// Waits for any refresh of the same pool to finish.
    pub fn update_config(&self, pool_id: &str, new_config: PoolConfig) -> Result<()> {
        let holder = self.lookup(pool_id)?;
        if new_config.pool_id != pool_id {
            return Err(PoolError::InvalidConfig(format!(
                "config pool_id {} does not match {}",
                new_config.pool_id, pool_id
            )));
        }
        new_config.validate().map_err(PoolError::InvalidConfig)?;

        let _refresh_guard = holder.lock_refresh();
        holder.replace_config(new_config);
        Ok(())
    }

    pub fn contains(&self, pool_id: &str) -> bool {
        self.holders.contains_key(pool_id)
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Registered ids, sorted
    pub fn pool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.holders.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stored configuration of every pool, sorted by id
    pub fn snapshot(&self) -> IndexMap<String, PoolConfig> {
        let mut snapshot: IndexMap<String, PoolConfig> = self
            .holders
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().config()))
            .collect();
        snapshot.sort_keys();
        snapshot
    }
}
