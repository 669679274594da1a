//! Reconfiguration Engine Tests
//!
//! - Apply ordering never exposes core > max on the live pool
//! - Unchanged and unknown pools produce no mutation and no event
//! - Non-resizable queues ignore capacity changes
//! - A rejected policy leaves earlier fields applied and the stored config as it was
//! - Refreshes of one pool are serialized

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hp_common::{fields, ChangeEvent, PoolConfig, PoolConfigUpdate, QueueKind, RejectPolicy};
use hp_pool::{
    ChangeNotifier, PoolError, PoolRegistry, ReconfigurablePool, ReconfigurationEngine, RefreshOutcome,
    ThreadPoolExecutor,
};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct PoolState {
    core_size: usize,
    max_size: usize,
    allow_core_timeout: bool,
    keep_alive: Duration,
    reject_policy: RejectPolicy,
    queue_capacity: usize,
}

/// Pool that records every setter call and checks `core <= max` after each one
struct RecordingPool {
    pool_id: String,
    queue_kind: QueueKind,
    state: Mutex<PoolState>,
    calls: Mutex<Vec<&'static str>>,
    violations: AtomicUsize,
    setter_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingPool {
    fn new(config: &PoolConfig) -> Self {
        Self {
            pool_id: config.pool_id.clone(),
            queue_kind: config.queue_kind,
            state: Mutex::new(PoolState {
                core_size: config.core_size,
                max_size: config.max_size,
                allow_core_timeout: config.allow_core_timeout,
                keep_alive: Duration::from_secs(config.keep_alive_seconds),
                reject_policy: config.reject_policy,
                queue_capacity: config.queue_capacity,
            }),
            calls: Mutex::new(Vec::new()),
            violations: AtomicUsize::new(0),
            setter_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_setter_delay(mut self, delay: Duration) -> Self {
        self.setter_delay = delay;
        self
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn state(&self) -> PoolState {
        self.state.lock().clone()
    }

    fn mutate<F: FnOnce(&mut PoolState)>(&self, call: &'static str, f: F) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.setter_delay.is_zero() {
            thread::sleep(self.setter_delay);
        }

        {
            let mut state = self.state.lock();
            f(&mut state);
            if state.core_size > state.max_size {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.calls.lock().push(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ReconfigurablePool for RecordingPool {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn core_size(&self) -> usize {
        self.state.lock().core_size
    }

    fn max_size(&self) -> usize {
        self.state.lock().max_size
    }

    fn set_core_size(&self, core_size: usize) -> hp_pool::Result<()> {
        self.mutate(fields::CORE_SIZE, |s| s.core_size = core_size);
        Ok(())
    }

    fn set_max_size(&self, max_size: usize) -> hp_pool::Result<()> {
        self.mutate(fields::MAX_SIZE, |s| s.max_size = max_size);
        Ok(())
    }

    fn set_allow_core_timeout(&self, allow: bool) {
        self.mutate(fields::ALLOW_CORE_TIMEOUT, |s| s.allow_core_timeout = allow);
    }

    fn set_keep_alive(&self, keep_alive: Duration) {
        self.mutate(fields::KEEP_ALIVE_SECONDS, |s| s.keep_alive = keep_alive);
    }

    fn set_reject_policy(&self, policy: RejectPolicy) -> hp_pool::Result<()> {
        self.mutate(fields::REJECT_POLICY, |s| s.reject_policy = policy);
        Ok(())
    }

    fn queue_kind(&self) -> QueueKind {
        self.queue_kind
    }

    fn queue_capacity(&self) -> Option<usize> {
        Some(self.state.lock().queue_capacity)
    }

    fn resize_queue(&self, capacity: usize) -> hp_pool::Result<bool> {
        if !self.queue_kind.is_resizable() {
            return Ok(false);
        }
        self.mutate(fields::QUEUE_CAPACITY, |s| s.queue_capacity = capacity);
        Ok(true)
    }
}

/// Notifier that keeps every dispatched event
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(ChangeEvent, String)>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<(ChangeEvent, String)> {
        self.events.lock().clone()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn dispatch(&self, event: &ChangeEvent, destination: &str) {
        self.events.lock().push((event.clone(), destination.to_string()));
    }
}

struct Fixture {
    registry: Arc<PoolRegistry>,
    notifier: Arc<RecordingNotifier>,
    engine: ReconfigurationEngine,
}

fn fixture() -> Fixture {
    let registry = Arc::new(PoolRegistry::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = ReconfigurationEngine::new(registry.clone(), notifier.clone()).with_destination("DING");
    Fixture {
        registry,
        notifier,
        engine,
    }
}

fn register_recording(fixture: &Fixture, config: PoolConfig) -> Arc<RecordingPool> {
    let pool = Arc::new(RecordingPool::new(&config));
    let pool_id = config.pool_id.clone();
    fixture.registry.register(&pool_id, pool.clone(), config).unwrap();
    pool
}

fn applied(outcome: RefreshOutcome) -> ChangeEvent {
    match outcome {
        RefreshOutcome::Applied(event) => event,
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn test_grow_past_live_max_sets_max_first() {
    let fx = fixture();
    let pool = register_recording(&fx, PoolConfig::new("P1", 2, 4));

    let candidate = PoolConfigUpdate::new("P1").with_core_size(6).with_max_size(8);
    let event = applied(fx.engine.refresh(&candidate).unwrap());

    assert_eq!(pool.calls(), vec!["max_size", "core_size"]);
    assert_eq!(pool.violations.load(Ordering::SeqCst), 0);

    let keys: Vec<&str> = event.changes.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["max_size", "core_size"]);
    assert_eq!(event.change(fields::CORE_SIZE).unwrap().to_string(), "2 => 6");
    assert_eq!(event.change(fields::MAX_SIZE).unwrap().to_string(), "4 => 8");

    let stored = fx.registry.lookup("P1").unwrap().config();
    assert_eq!((stored.core_size, stored.max_size), (6, 8));
}

#[test]
fn test_shrink_sets_core_first() {
    let fx = fixture();
    let pool = register_recording(&fx, PoolConfig::new("P1", 6, 8));

    let candidate = PoolConfigUpdate::new("P1").with_core_size(1).with_max_size(2);
    applied(fx.engine.refresh(&candidate).unwrap());

    assert_eq!(pool.calls(), vec!["core_size", "max_size"]);
    assert_eq!(pool.violations.load(Ordering::SeqCst), 0);
    let state = pool.state();
    assert_eq!((state.core_size, state.max_size), (1, 2));
}

#[test]
fn test_identical_candidate_is_unchanged() {
    let fx = fixture();
    let config = PoolConfig::new("P1", 2, 4).with_notify_recipients("138");
    let pool = register_recording(&fx, config.clone());

    let outcome = fx.engine.refresh(&PoolConfigUpdate::from(config)).unwrap();
    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert!(pool.calls().is_empty());
    assert!(fx.notifier.events().is_empty());

    let outcome = fx.engine.refresh(&PoolConfigUpdate::new("P1")).unwrap();
    assert_eq!(outcome, RefreshOutcome::Unchanged);
}

#[test]
fn test_capacity_change_ignored_for_array_queue() {
    let fx = fixture();
    let pool = register_recording(&fx, PoolConfig::new("P1", 2, 4).with_queue(QueueKind::Array, 100));

    let candidate = PoolConfigUpdate::new("P1").with_queue_capacity(500);
    assert_eq!(fx.engine.refresh(&candidate).unwrap(), RefreshOutcome::Unchanged);
    assert!(pool.calls().is_empty());
    assert_eq!(fx.registry.lookup("P1").unwrap().config().queue_capacity, 100);
}

#[test]
fn test_capacity_change_applied_for_resizable_queue() {
    let fx = fixture();
    let pool = register_recording(&fx, PoolConfig::new("P1", 2, 4).with_queue(QueueKind::Resizable, 100));

    let candidate = PoolConfigUpdate::new("P1")
        .with_queue_capacity(500)
        .with_max_size(4)
        .with_keep_alive_seconds(30);
    let event = applied(fx.engine.refresh(&candidate).unwrap());

    assert_eq!(pool.calls(), vec!["keep_alive_seconds", "queue_capacity"]);
    assert_eq!(event.change(fields::QUEUE_CAPACITY).unwrap().to_string(), "100 => 500");
    assert!(event.change(fields::MAX_SIZE).is_none());
    assert_eq!(pool.state().queue_capacity, 500);
    assert_eq!(fx.registry.lookup("P1").unwrap().config().queue_capacity, 500);
}

#[test]
fn test_fields_applied_in_fixed_order() {
    let fx = fixture();
    let pool = register_recording(&fx, PoolConfig::new("P1", 2, 4));

    let candidate = PoolConfigUpdate::new("P1")
        .with_queue_capacity(10)
        .with_keep_alive_seconds(5)
        .with_reject_policy(RejectPolicy::RunByCaller)
        .with_allow_core_timeout(true)
        .with_max_size(5)
        .with_core_size(3);
    let event = applied(fx.engine.refresh(&candidate).unwrap());

    let expected = vec![
        "core_size",
        "max_size",
        "allow_core_timeout",
        "reject_policy",
        "keep_alive_seconds",
        "queue_capacity",
    ];
    assert_eq!(pool.calls(), expected);
    let keys: Vec<&str> = event.changes.keys().map(String::as_str).collect();
    assert_eq!(keys, expected);
    assert_eq!(
        event.change(fields::REJECT_POLICY).unwrap().to_string(),
        "AbortPolicy => CallerRunsPolicy"
    );
}

#[test]
fn test_unknown_pool_is_not_found() {
    let fx = fixture();
    register_recording(&fx, PoolConfig::new("P1", 2, 4));

    let candidate = PoolConfigUpdate::new("GHOST").with_core_size(3);
    assert_eq!(fx.engine.refresh(&candidate).unwrap(), RefreshOutcome::NotFound);
    assert_eq!(fx.registry.pool_ids(), vec!["P1"]);
    assert!(fx.notifier.events().is_empty());
}

#[test]
fn test_invalid_merged_config_mutates_nothing() {
    let fx = fixture();
    let pool = register_recording(&fx, PoolConfig::new("P1", 2, 4));

    let candidate = PoolConfigUpdate::new("P1").with_core_size(10);
    let result = fx.engine.refresh(&candidate);

    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    assert!(pool.calls().is_empty());
    assert_eq!(fx.registry.lookup("P1").unwrap().config().core_size, 2);
}

#[test]
fn test_rejected_policy_keeps_earlier_fields_applied() {
    let fx = fixture();
    let config = PoolConfig::new("SYNC", 1, 2).with_queue(QueueKind::Synchronous, 0);
    let executor = ThreadPoolExecutor::new(config.clone()).unwrap();
    fx.registry.register("SYNC", executor.clone(), config).unwrap();

    let candidate = PoolConfigUpdate::new("SYNC")
        .with_core_size(2)
        .with_max_size(4)
        .with_reject_policy(RejectPolicy::DropOldest)
        .with_keep_alive_seconds(5);
    let result = fx.engine.refresh(&candidate);
    assert!(matches!(result, Err(PoolError::InvalidPolicy(_))));

    // Sizes landed before the policy step and were not rolled back
    assert_eq!((executor.core_size(), executor.max_size()), (2, 4));
    // Steps after the policy never ran
    assert_eq!(executor.keep_alive(), Duration::from_secs(60));
    assert_eq!(executor.reject_policy(), RejectPolicy::AbortOnFull);

    // Stored config records the sizes that landed, nothing after them
    let stored = fx.registry.lookup("SYNC").unwrap().config();
    assert_eq!((stored.core_size, stored.max_size), (2, 4));
    assert_eq!(stored.reject_policy, RejectPolicy::AbortOnFull);
    assert_eq!(stored.keep_alive_seconds, 60);
    assert!(fx.notifier.events().is_empty());

    // Restoring the old sizes is seen as a change and reaches the live pool
    let restore = PoolConfigUpdate::new("SYNC").with_core_size(1).with_max_size(2);
    assert!(matches!(fx.engine.refresh(&restore), Ok(RefreshOutcome::Applied(_))));
    assert_eq!((executor.core_size(), executor.max_size()), (1, 2));

    executor.shutdown();
}

#[test]
fn test_event_dispatched_with_destination_and_recipients() {
    let fx = fixture();
    register_recording(&fx, PoolConfig::new("P1", 2, 4).with_notify_recipients("138"));

    let candidate = PoolConfigUpdate::new("P1").with_max_size(6);
    applied(fx.engine.refresh(&candidate).unwrap());

    let candidate = PoolConfigUpdate::new("P1")
        .with_max_size(7)
        .with_notify_recipients("139,140");
    applied(fx.engine.refresh(&candidate).unwrap());

    let events = fx.notifier.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].1, "DING");
    assert_eq!(events[0].0.notify_recipients.as_deref(), Some("138"));
    assert_eq!(events[1].0.notify_recipients.as_deref(), Some("139,140"));
    assert_eq!(events[1].0.queue_kind, QueueKind::Resizable);
}

#[test]
fn test_no_destination_means_no_dispatch() {
    let registry = Arc::new(PoolRegistry::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = ReconfigurationEngine::new(registry.clone(), notifier.clone());

    let config = PoolConfig::new("P1", 1, 2);
    registry
        .register("P1", Arc::new(RecordingPool::new(&config)), config)
        .unwrap();

    applied(engine.refresh(&PoolConfigUpdate::new("P1").with_max_size(3)).unwrap());
    assert!(notifier.events().is_empty());
}

#[test]
fn test_concurrent_refreshes_of_one_pool_are_serialized() {
    let fx = Arc::new(fixture());
    let config = PoolConfig::new("P1", 1, 2);
    let pool = Arc::new(RecordingPool::new(&config).with_setter_delay(Duration::from_millis(5)));
    fx.registry.register("P1", pool.clone(), config).unwrap();

    let handles: Vec<_> = (1..=8)
        .map(|core| {
            let fx = fx.clone();
            thread::spawn(move || {
                let candidate = PoolConfigUpdate::new("P1")
                    .with_core_size(core)
                    .with_max_size(core + 4);
                fx.engine.refresh(&candidate).unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(pool.violations.load(Ordering::SeqCst), 0);

    let state = pool.state();
    let stored = fx.registry.lookup("P1").unwrap().config();
    assert_eq!((stored.core_size, stored.max_size), (state.core_size, state.max_size));
}

#[test]
fn test_refresh_all_collects_outcomes() {
    let fx = fixture();
    register_recording(&fx, PoolConfig::new("P1", 2, 4));
    register_recording(&fx, PoolConfig::new("P2", 1, 1));
    register_recording(&fx, PoolConfig::new("P3", 1, 2));

    let candidates = vec![
        PoolConfigUpdate::new("P1").with_max_size(8),
        PoolConfigUpdate::new("P2").with_max_size(1),
        PoolConfigUpdate::new("GHOST").with_max_size(8),
        PoolConfigUpdate::new("P3").with_core_size(5),
    ];
    let summary = fx.engine.refresh_all(&candidates);

    assert_eq!(summary.applied, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.not_found, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "P3");
    assert!(!summary.is_success());
}

#[test]
fn test_refresh_drives_real_executor() {
    let fx = fixture();
    let config = PoolConfig::new("LIVE", 1, 2).with_queue(QueueKind::Resizable, 1);
    let executor = ThreadPoolExecutor::new(config.clone()).unwrap();
    fx.registry.register("LIVE", executor.clone(), config).unwrap();

    let candidate = PoolConfigUpdate::new("LIVE")
        .with_core_size(3)
        .with_max_size(6)
        .with_queue_capacity(64)
        .with_reject_policy(RejectPolicy::DropNewest);
    applied(fx.engine.refresh(&candidate).unwrap());

    let stats = executor.stats();
    assert_eq!((stats.core_size, stats.max_size), (3, 6));
    assert_eq!(stats.queue_capacity, Some(64));
    assert_eq!(stats.reject_policy, RejectPolicy::DropNewest);

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(2)));
}
