//! Hotpool live thread pools
//!
//! This crate provides:
//! - ThreadPoolExecutor: core/max worker pool over a configurable work queue
//! - ReconfigurablePool: the tunables the engine may change on a live pool
//! - PoolRegistry: process-scoped map of pool id to live pool and last applied config
//! - ReconfigurationEngine: diff a candidate config and apply it safely to a running pool
//! - NotifierDispatcher: deliver change events to a notification platform (DingTalk)
//! - Hotpool: wiring from bootstrap configuration

pub mod bootstrap;
pub mod engine;
pub mod error;
pub mod executor;
pub mod notification;
pub mod pool;
pub mod pool_metrics;
pub mod registry;

pub use bootstrap::Hotpool;
pub use engine::{ReconfigurationEngine, RefreshOutcome, RefreshSummary};
pub use error::PoolError;
pub use executor::{PoolStats, Task, ThreadPoolExecutor};
pub use notification::{
    ChangeMessage, ChangeNotifier, DingTalkNotifierService, NoOpNotifierService, NotifierDispatcher,
    NotifierService, NotifyContext, NotifyError,
};
pub use pool::ReconfigurablePool;
pub use registry::{PoolHolder, PoolRegistry};

pub type Result<T> = std::result::Result<T, PoolError>;
