//! Core/max thread pool over a configurable work queue
//!
//! Submission order follows the standard model:
//! 1. Fewer than `core_size` workers: start a core worker with the task.
//! 2. Otherwise queue the task.
//! 3. Queue full: start an extra worker, up to `max_size`.
//! 4. Still no room: hand the task to the reject policy.
//!
//! Workers wait on the queue with a short recheck interval, so live changes to
//! sizes and keep-alive are picked up without interrupting anyone. Workers
//! above `max_size`, and idle workers past keep-alive, retire at their next
//! check.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use hp_common::{PoolConfig, QueueKind, RejectPolicy};
use hp_queue::{create_queue, WorkQueue};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::pool::ReconfigurablePool;
use crate::pool_metrics;
use crate::Result;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// How long an idle worker waits on the queue before re-reading its limits
const WORKER_RECHECK_INTERVAL: Duration = Duration::from_millis(100);

struct WorkerState {
    count: usize,
    largest: usize,
}

/// Point-in-time view of an executor
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_id: String,
    pub core_size: usize,
    pub max_size: usize,
    pub pool_size: usize,
    pub largest_pool_size: usize,
    pub active_count: usize,
    pub queue_kind: QueueKind,
    pub queue_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    pub queue_remaining_capacity: usize,
    pub completed_tasks: u64,
    pub rejected_tasks: u64,
    pub reject_policy: RejectPolicy,
    pub keep_alive_seconds: u64,
    pub allow_core_timeout: bool,
    pub running: bool,
}

pub struct ThreadPoolExecutor {
    pool_id: String,
    queue: Arc<dyn WorkQueue<Task>>,

    core_size: AtomicUsize,
    max_size: AtomicUsize,
    allow_core_timeout: AtomicBool,
    keep_alive: RwLock<Duration>,
    reject_policy: RwLock<RejectPolicy>,

    /// Worker count; changed only under this lock so size checks and spawns agree
    workers: Mutex<WorkerState>,
    terminated: Condvar,

    active_count: AtomicUsize,
    completed_tasks: AtomicU64,
    rejected_tasks: AtomicU64,
    next_worker_id: AtomicUsize,
    running: AtomicBool,

    self_ref: Weak<ThreadPoolExecutor>,
}

impl ThreadPoolExecutor {
    pub fn new(config: PoolConfig) -> Result<Arc<Self>> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        check_policy(&config.pool_id, config.queue_kind, config.reject_policy)?;

        let queue = create_queue::<Task>(config.queue_kind, config.queue_capacity)?;

        info!(
            pool_id = %config.pool_id,
            core_size = config.core_size,
            max_size = config.max_size,
            queue_kind = %config.queue_kind,
            queue_capacity = config.queue_capacity,
            reject_policy = %config.reject_policy,
            "Creating thread pool"
        );
        pool_metrics::set_pool_sizes(&config.pool_id, config.core_size, config.max_size);
        pool_metrics::set_queue_capacity(&config.pool_id, queue.capacity());

        Ok(Arc::new_cyclic(|self_ref| Self {
            pool_id: config.pool_id,
            queue,
            core_size: AtomicUsize::new(config.core_size),
            max_size: AtomicUsize::new(config.max_size),
            allow_core_timeout: AtomicBool::new(config.allow_core_timeout),
            keep_alive: RwLock::new(Duration::from_secs(config.keep_alive_seconds)),
            reject_policy: RwLock::new(config.reject_policy),
            workers: Mutex::new(WorkerState { count: 0, largest: 0 }),
            terminated: Condvar::new(),
            active_count: AtomicUsize::new(0),
            completed_tasks: AtomicU64::new(0),
            rejected_tasks: AtomicU64::new(0),
            next_worker_id: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            self_ref: self_ref.clone(),
        }))
    }

    /// Submit a task for execution.
    ///
    /// Fails with `Shutdown` after `shutdown()` and with `Rejected` when the
    /// pool is saturated under `AbortOnFull`.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_task(Box::new(task))
    }

    fn execute_task(&self, task: Task) -> Result<()> {
        if !self.is_running() {
            return Err(PoolError::Shutdown(self.pool_id.clone()));
        }

        let task = if self.worker_count() < self.core_size() {
            match self.add_worker(Some(task), true) {
                Ok(()) => return Ok(()),
                Err(task) => task,
            }
        } else {
            Some(task)
        };
        let Some(task) = task else {
            return Ok(());
        };

        let task = match self.queue.offer(task) {
            Ok(()) => {
                if self.worker_count() == 0 {
                    // Core size 0: someone has to drain the queue
                    let _ = self.add_worker(None, false);
                }
                return Ok(());
            }
            Err(task) => task,
        };

        match self.add_worker(Some(task), false) {
            Ok(()) => Ok(()),
            Err(Some(task)) => self.reject(task),
            Err(None) => Ok(()),
        }
    }

    fn reject(&self, task: Task) -> Result<()> {
        let policy = *self.reject_policy.read();
        self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
        pool_metrics::record_task_rejected(&self.pool_id, policy.name());

        match policy {
            RejectPolicy::AbortOnFull => {
                warn!(pool_id = %self.pool_id, "Pool saturated, task rejected");
                Err(PoolError::Rejected {
                    pool_id: self.pool_id.clone(),
                })
            }
            RejectPolicy::RunByCaller => {
                if self.is_running() {
                    debug!(pool_id = %self.pool_id, "Pool saturated, running task on caller");
                    run_task(&self.pool_id, task);
                }
                Ok(())
            }
            RejectPolicy::DropNewest => {
                debug!(pool_id = %self.pool_id, "Pool saturated, dropping new task");
                Ok(())
            }
            RejectPolicy::DropOldest => {
                if !self.is_running() {
                    return Ok(());
                }
                let dropped = self.queue.poll().is_some();
                if self.queue.offer(task).is_err() {
                    warn!(pool_id = %self.pool_id, "Pool saturated after dropping oldest task, new task dropped");
                } else {
                    debug!(pool_id = %self.pool_id, dropped, "Pool saturated, dropped oldest queued task");
                }
                Ok(())
            }
        }
    }

    /// Start a worker if the bound allows it. Hands `first` back when it does not.
    fn add_worker(&self, first: Option<Task>, core: bool) -> std::result::Result<(), Option<Task>> {
        let Some(this) = self.self_ref.upgrade() else {
            return Err(first);
        };

        let mut workers = self.workers.lock();
        let bound = if core { self.core_size() } else { self.max_size() };
        if !self.is_running() || workers.count >= bound {
            return Err(first);
        }

        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-worker-{}", self.pool_id, worker_id);

        // The closure owns `first`; if the spawn fails it is lost with it.
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || this.run_worker(first));

        match spawned {
            Ok(_) => {
                workers.count += 1;
                workers.largest = workers.largest.max(workers.count);
                debug!(pool_id = %self.pool_id, worker = %name, pool_size = workers.count, "Worker started");
                Ok(())
            }
            Err(e) => {
                error!(pool_id = %self.pool_id, error = %e, "Failed to spawn worker thread");
                Err(None)
            }
        }
    }

    fn run_worker(self: Arc<Self>, first: Option<Task>) {
        let mut task = first;
        let mut idle_since = Instant::now();

        loop {
            if let Some(current) = task.take() {
                self.active_count.fetch_add(1, Ordering::SeqCst);
                run_task(&self.pool_id, current);
                self.active_count.fetch_sub(1, Ordering::SeqCst);
                self.completed_tasks.fetch_add(1, Ordering::Relaxed);
                idle_since = Instant::now();
            }

            if self.try_retire(idle_since) {
                break;
            }

            task = self.queue.poll_timeout(self.idle_wait());
        }
    }

    /// How long an idle worker waits for work before rechecking. Only workers
    /// that may time out wait less than the recheck interval.
    fn idle_wait(&self) -> Duration {
        let may_time_out =
            self.allow_core_timeout.load(Ordering::SeqCst) || self.workers.lock().count > self.core_size();
        if may_time_out {
            WORKER_RECHECK_INTERVAL
                .min(*self.keep_alive.read())
                .max(Duration::from_millis(1))
        } else {
            WORKER_RECHECK_INTERVAL
        }
    }

    /// Decide under the worker lock whether this worker exits, and if so
    /// remove it from the count.
    fn try_retire(&self, idle_since: Instant) -> bool {
        let mut workers = self.workers.lock();
        let count = workers.count;

        let retire = if !self.is_running() {
            self.queue.is_empty()
        } else if count > self.max_size() {
            true
        } else {
            let timed_out = idle_since.elapsed() >= *self.keep_alive.read();
            let may_time_out = count > self.core_size() || self.allow_core_timeout.load(Ordering::SeqCst);
            timed_out && may_time_out && (count > 1 || self.queue.is_empty())
        };

        if retire {
            workers.count -= 1;
            debug!(pool_id = %self.pool_id, pool_size = workers.count, "Worker retired");
            if workers.count == 0 {
                self.terminated.notify_all();
            }
        }
        retire
    }

    /// Stop accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(pool_id = %self.pool_id, queued = self.queue.len(), "Shutting down thread pool");
        }
        let workers = self.workers.lock();
        if workers.count == 0 {
            self.terminated.notify_all();
        }
    }

    /// Wait until every worker has exited after `shutdown()`.
    /// Returns false on timeout or if the pool is still running.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if self.is_running() {
            return false;
        }
        let deadline = Instant::now().checked_add(timeout);
        let mut workers = self.workers.lock();
        while workers.count > 0 {
            match deadline {
                Some(deadline) => {
                    if self.terminated.wait_until(&mut workers, deadline).timed_out() {
                        return workers.count == 0;
                    }
                }
                None => self.terminated.wait(&mut workers),
            }
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().count
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn reject_policy(&self) -> RejectPolicy {
        *self.reject_policy.read()
    }

    pub fn keep_alive(&self) -> Duration {
        *self.keep_alive.read()
    }

    pub fn allows_core_timeout(&self) -> bool {
        self.allow_core_timeout.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let (pool_size, largest_pool_size) = {
            let workers = self.workers.lock();
            (workers.count, workers.largest)
        };
        PoolStats {
            pool_id: self.pool_id.clone(),
            core_size: self.core_size(),
            max_size: self.max_size(),
            pool_size,
            largest_pool_size,
            active_count: self.active_count(),
            queue_kind: self.queue.kind(),
            queue_size: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            queue_remaining_capacity: self.queue.remaining_capacity(),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            reject_policy: self.reject_policy(),
            keep_alive_seconds: self.keep_alive().as_secs(),
            allow_core_timeout: self.allows_core_timeout(),
            running: self.is_running(),
        }
    }
}

impl ReconfigurablePool for ThreadPoolExecutor {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn core_size(&self) -> usize {
        self.core_size.load(Ordering::SeqCst)
    }

    fn max_size(&self) -> usize {
        self.max_size.load(Ordering::SeqCst)
    }

    fn set_core_size(&self, core_size: usize) -> Result<()> {
        let max_size = self.max_size();
        if core_size > max_size {
            return Err(PoolError::InvalidPoolSize {
                pool_id: self.pool_id.clone(),
                core_size,
                max_size,
            });
        }

        let previous = self.core_size.swap(core_size, Ordering::SeqCst);
        pool_metrics::set_pool_sizes(&self.pool_id, core_size, max_size);

        // Start core workers for work that is already waiting
        if core_size > previous {
            let missing = core_size.saturating_sub(self.worker_count());
            let wanted = missing.min(self.queue.len());
            for _ in 0..wanted {
                if self.add_worker(None, true).is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    fn set_max_size(&self, max_size: usize) -> Result<()> {
        let core_size = self.core_size();
        if max_size == 0 || max_size < core_size {
            return Err(PoolError::InvalidPoolSize {
                pool_id: self.pool_id.clone(),
                core_size,
                max_size,
            });
        }
        self.max_size.store(max_size, Ordering::SeqCst);
        pool_metrics::set_pool_sizes(&self.pool_id, core_size, max_size);
        Ok(())
    }

    fn set_allow_core_timeout(&self, allow: bool) {
        self.allow_core_timeout.store(allow, Ordering::SeqCst);
    }

    fn set_keep_alive(&self, keep_alive: Duration) {
        *self.keep_alive.write() = keep_alive;
    }

    fn set_reject_policy(&self, policy: RejectPolicy) -> Result<()> {
        check_policy(&self.pool_id, self.queue.kind(), policy)?;
        *self.reject_policy.write() = policy;
        Ok(())
    }

    fn queue_kind(&self) -> QueueKind {
        self.queue.kind()
    }

    fn queue_capacity(&self) -> Option<usize> {
        self.queue.capacity()
    }

    fn resize_queue(&self, capacity: usize) -> Result<bool> {
        match self.queue.as_resizable() {
            Some(queue) => {
                queue.set_capacity(capacity)?;
                pool_metrics::set_queue_capacity(&self.pool_id, Some(capacity));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("pool_id", &self.pool_id)
            .field("core_size", &self.core_size())
            .field("max_size", &self.max_size())
            .field("queue_kind", &self.queue.kind())
            .field("running", &self.is_running())
            .finish()
    }
}

/// A handoff queue never holds a task, so there is no oldest task to drop.
fn check_policy(pool_id: &str, kind: QueueKind, policy: RejectPolicy) -> Result<()> {
    if policy == RejectPolicy::DropOldest && kind == QueueKind::Synchronous {
        return Err(PoolError::InvalidPolicy(format!(
            "[{}] {} cannot be used with {}",
            pool_id, policy, kind
        )));
    }
    Ok(())
}

fn run_task(pool_id: &str, task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!(pool_id = %pool_id, "Task panicked");
    }
}
