//! Wiring from bootstrap configuration to live pools
//!
//! Builds one `ThreadPoolExecutor` per configured executor, registers each,
//! and connects the reconfiguration engine to the configured notification
//! platform. Reloading a config turns every executor entry into a refresh
//! candidate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hp_config::AppConfig;
use indexmap::IndexMap;
use tracing::info;

use crate::engine::{ReconfigurationEngine, RefreshSummary};
use crate::executor::ThreadPoolExecutor;
use crate::notification::{ChangeNotifier, NotifierDispatcher};
use crate::registry::PoolRegistry;

pub struct Hotpool {
    registry: Arc<PoolRegistry>,
    engine: ReconfigurationEngine,
    executors: IndexMap<String, Arc<ThreadPoolExecutor>>,
}

impl Hotpool {
    /// Start every configured pool. Must be called inside a tokio runtime for
    /// change notifications to be delivered.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let notifier: Arc<dyn ChangeNotifier> = Arc::new(NotifierDispatcher::from_config(config));
        Self::with_notifier(config, notifier)
    }

    pub fn with_notifier(config: &AppConfig, notifier: Arc<dyn ChangeNotifier>) -> anyhow::Result<Self> {
        let registry = Arc::new(PoolRegistry::new());
        let mut engine = ReconfigurationEngine::new(registry.clone(), notifier);
        if let Some(platform) = &config.notify.platform {
            engine = engine.with_destination(platform.clone());
        }

        let pool_configs = config.pool_configs().context("invalid executor configuration")?;

        let mut executors = IndexMap::new();
        for pool_config in pool_configs {
            let pool_id = pool_config.pool_id.clone();
            let executor = ThreadPoolExecutor::new(pool_config.clone())
                .with_context(|| format!("failed to create pool {pool_id}"))?;
            registry
                .register(&pool_id, executor.clone(), pool_config)
                .with_context(|| format!("failed to register pool {pool_id}"))?;
            executors.insert(pool_id, executor);
        }

        info!(
            application = %config.application_name,
            pools = executors.len(),
            "Hotpool started"
        );

        Ok(Self {
            registry,
            engine,
            executors,
        })
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &ReconfigurationEngine {
        &self.engine
    }

    pub fn executor(&self, pool_id: &str) -> Option<Arc<ThreadPoolExecutor>> {
        self.executors.get(pool_id).cloned()
    }

    /// Refresh every pool from a newly loaded config.
    /// Executors not registered at startup are reported as not found.
    pub fn reload(&self, config: &AppConfig) -> anyhow::Result<RefreshSummary> {
        let candidates = config.pool_updates().context("invalid executor configuration")?;
        Ok(self.engine.refresh_all(&candidates))
    }

    /// Shut down every pool and wait up to `timeout` for each to finish.
    /// Returns false if any pool is still running tasks.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        for executor in self.executors.values() {
            executor.shutdown();
        }
        self.executors
            .values()
            .all(|executor| executor.await_termination(timeout))
    }
}
