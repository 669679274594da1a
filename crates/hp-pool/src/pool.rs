use std::time::Duration;

use hp_common::{QueueKind, RejectPolicy};

use crate::Result;

/// Live tunables of a running pool.
///
/// The reconfiguration engine changes a pool only through this trait. Setters
/// take effect immediately; none of them restart the pool.
pub trait ReconfigurablePool: Send + Sync {
    fn pool_id(&self) -> &str;

    fn core_size(&self) -> usize;

    fn max_size(&self) -> usize;

    /// Fails with `InvalidPoolSize` if `core_size` exceeds the current max.
    fn set_core_size(&self, core_size: usize) -> Result<()>;

    /// Fails with `InvalidPoolSize` if `max_size` is 0 or below the current core.
    fn set_max_size(&self, max_size: usize) -> Result<()>;

    fn set_allow_core_timeout(&self, allow: bool);

    fn set_keep_alive(&self, keep_alive: Duration);

    /// Install the handler for `policy` against the live queue.
    /// Fails with `InvalidPolicy` when the queue cannot support it.
    fn set_reject_policy(&self, policy: RejectPolicy) -> Result<()>;

    fn queue_kind(&self) -> QueueKind;

    /// `None` for unbounded queues
    fn queue_capacity(&self) -> Option<usize>;

    /// Change the queue capacity. `Ok(false)` if the queue kind is not resizable.
    fn resize_queue(&self, capacity: usize) -> Result<bool>;
}
