//! Live reconfiguration of registered pools
//!
//! `refresh` diffs a candidate against the stored config of its pool and
//! applies only the fields that changed, in an order that never leaves the
//! pool with `core_size > max_size`:
//!
//! 1. core/max (max first when the new core exceeds the live max)
//! 2. allow_core_timeout
//! 3. reject_policy
//! 4. keep_alive_seconds
//! 5. queue_capacity (resizable queues only)
//!
//! A reject policy the live queue cannot support aborts the remaining steps.
//! Steps already applied stay applied and are written to the stored config,
//! so the stored config always matches the live pool.

use std::sync::Arc;
use std::time::Duration;

use hp_common::{fields, ChangeEvent, PoolConfig, PoolConfigUpdate, QueueKind, RejectPolicy};
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::notification::ChangeNotifier;
use crate::pool::ReconfigurablePool;
use crate::pool_metrics;
use crate::registry::PoolRegistry;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Nothing the candidate supplied differs from the stored config
    Unchanged,
    Applied(ChangeEvent),
    /// No pool is registered under the candidate's id
    NotFound,
}

impl RefreshOutcome {
    fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Unchanged => "unchanged",
            RefreshOutcome::Applied(_) => "applied",
            RefreshOutcome::NotFound => "not_found",
        }
    }
}

/// Counters for a batch of refreshes
#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub failed: Vec<(String, PoolError)>,
}

impl RefreshSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fields that the candidate supplied with a value different from the stored one
#[derive(Debug, Default)]
struct ConfigDiff {
    core_size: Option<usize>,
    max_size: Option<usize>,
    allow_core_timeout: Option<bool>,
    reject_policy: Option<RejectPolicy>,
    keep_alive_seconds: Option<u64>,
    queue_capacity: Option<usize>,
}

impl ConfigDiff {
    fn compute(current: &PoolConfig, candidate: &PoolConfigUpdate, live_kind: QueueKind) -> Self {
        fn changed<T: PartialEq + Copy>(supplied: Option<T>, current: T) -> Option<T> {
            supplied.filter(|value| *value != current)
        }

        let mut queue_capacity = changed(candidate.queue_capacity, current.queue_capacity);
        if queue_capacity.is_some() && !live_kind.is_resizable() {
            info!(
                pool_id = %current.pool_id,
                queue_kind = %live_kind,
                current = current.queue_capacity,
                requested = ?candidate.queue_capacity,
                "Queue capacity change ignored for non-resizable queue"
            );
            queue_capacity = None;
        }

        Self {
            core_size: changed(candidate.core_size, current.core_size),
            max_size: changed(candidate.max_size, current.max_size),
            allow_core_timeout: changed(candidate.allow_core_timeout, current.allow_core_timeout),
            reject_policy: changed(candidate.reject_policy, current.reject_policy),
            keep_alive_seconds: changed(candidate.keep_alive_seconds, current.keep_alive_seconds),
            queue_capacity,
        }
    }

    fn is_empty(&self) -> bool {
        self.core_size.is_none()
            && self.max_size.is_none()
            && self.allow_core_timeout.is_none()
            && self.reject_policy.is_none()
            && self.keep_alive_seconds.is_none()
            && self.queue_capacity.is_none()
    }

    /// Only the fields `event` recorded as applied
    fn retain_applied(&self, event: &ChangeEvent) -> Self {
        let applied = |field: &str| event.change(field).is_some();
        Self {
            core_size: self.core_size.filter(|_| applied(fields::CORE_SIZE)),
            max_size: self.max_size.filter(|_| applied(fields::MAX_SIZE)),
            allow_core_timeout: self.allow_core_timeout.filter(|_| applied(fields::ALLOW_CORE_TIMEOUT)),
            reject_policy: self.reject_policy.filter(|_| applied(fields::REJECT_POLICY)),
            keep_alive_seconds: self.keep_alive_seconds.filter(|_| applied(fields::KEEP_ALIVE_SECONDS)),
            queue_capacity: self.queue_capacity.filter(|_| applied(fields::QUEUE_CAPACITY)),
        }
    }

    /// `current` with every changed field replaced
    fn merge_into(&self, current: &PoolConfig, candidate: &PoolConfigUpdate) -> PoolConfig {
        let mut merged = current.clone();
        if let Some(value) = self.core_size {
            merged.core_size = value;
        }
        if let Some(value) = self.max_size {
            merged.max_size = value;
        }
        if let Some(value) = self.allow_core_timeout {
            merged.allow_core_timeout = value;
        }
        if let Some(value) = self.reject_policy {
            merged.reject_policy = value;
        }
        if let Some(value) = self.keep_alive_seconds {
            merged.keep_alive_seconds = value;
        }
        if let Some(value) = self.queue_capacity {
            merged.queue_capacity = value;
        }
        if candidate.notify_recipients.is_some() {
            merged.notify_recipients = candidate.notify_recipients.clone();
        }
        merged
    }
}

pub struct ReconfigurationEngine {
    registry: Arc<PoolRegistry>,
    notifier: Arc<dyn ChangeNotifier>,
    destination: Option<String>,
}

impl ReconfigurationEngine {
    pub fn new(registry: Arc<PoolRegistry>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            registry,
            notifier,
            destination: None,
        }
    }

    /// Platform change events are dispatched to. Without one, events are only logged.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Apply `candidate` to its live pool.
    ///
    /// Refreshes of the same pool are serialized; different pools proceed
    /// independently.
    pub fn refresh(&self, candidate: &PoolConfigUpdate) -> Result<RefreshOutcome> {
        let holder = match self.registry.lookup(&candidate.pool_id) {
            Ok(holder) => holder,
            Err(PoolError::NotFound(_)) => {
                warn!(pool_id = %candidate.pool_id, "Refresh skipped: pool not registered");
                pool_metrics::record_refresh(&candidate.pool_id, RefreshOutcome::NotFound.label());
                return Ok(RefreshOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        let _refresh_guard = holder.lock_refresh();
        let current = holder.config();
        let pool = holder.pool();

        let diff = ConfigDiff::compute(&current, candidate, pool.queue_kind());
        if diff.is_empty() {
            debug!(pool_id = %candidate.pool_id, "Refresh: no changes");
            pool_metrics::record_refresh(&candidate.pool_id, RefreshOutcome::Unchanged.label());
            return Ok(RefreshOutcome::Unchanged);
        }

        let merged = diff.merge_into(&current, candidate);
        if let Err(reason) = merged.validate() {
            pool_metrics::record_refresh(&candidate.pool_id, "failed");
            return Err(PoolError::InvalidConfig(reason));
        }

        let mut event = ChangeEvent::new(current.pool_id.clone(), pool.queue_kind());
        event.notify_recipients = merged.notify_recipients.clone();

        if let Err(e) = apply(pool.as_ref(), &current, &diff, &mut event) {
            error!(
                pool_id = %current.pool_id,
                error = %e,
                applied = ?event.changes.keys().collect::<Vec<_>>(),
                "Refresh aborted; fields already applied are kept"
            );
            if !event.changes.is_empty() {
                let landed = diff
                    .retain_applied(&event)
                    .merge_into(&current, &PoolConfigUpdate::new(current.pool_id.clone()));
                holder.replace_config(landed);
            }
            pool_metrics::record_refresh(&candidate.pool_id, "failed");
            return Err(e);
        }

        holder.replace_config(merged.clone());
        log_change(&merged, &event);
        pool_metrics::record_refresh(&candidate.pool_id, "applied");

        if let Some(destination) = &self.destination {
            self.notifier.dispatch(&event, destination);
        }

        Ok(RefreshOutcome::Applied(event))
    }

    /// Refresh every candidate. Failures are collected, never abort the batch.
    pub fn refresh_all<'a, I>(&self, candidates: I) -> RefreshSummary
    where
        I: IntoIterator<Item = &'a PoolConfigUpdate>,
    {
        let mut summary = RefreshSummary::default();
        for candidate in candidates {
            match self.refresh(candidate) {
                Ok(RefreshOutcome::Applied(_)) => summary.applied += 1,
                Ok(RefreshOutcome::Unchanged) => summary.unchanged += 1,
                Ok(RefreshOutcome::NotFound) => summary.not_found += 1,
                Err(e) => {
                    warn!(pool_id = %candidate.pool_id, error = %e, "Refresh failed");
                    summary.failed.push((candidate.pool_id.clone(), e));
                }
            }
        }

        info!(
            applied = summary.applied,
            unchanged = summary.unchanged,
            not_found = summary.not_found,
            failed = summary.failed.len(),
            "Refresh batch complete"
        );
        summary
    }
}

/// Apply the diff to the live pool, recording each field in `event` as it lands.
fn apply(
    pool: &dyn ReconfigurablePool,
    current: &PoolConfig,
    diff: &ConfigDiff,
    event: &mut ChangeEvent,
) -> Result<()> {
    match (diff.core_size, diff.max_size) {
        (Some(core), Some(max)) => {
            if core > pool.max_size() {
                pool.set_max_size(max)?;
                event.record(fields::MAX_SIZE, current.max_size, max);
                pool.set_core_size(core)?;
                event.record(fields::CORE_SIZE, current.core_size, core);
            } else {
                pool.set_core_size(core)?;
                event.record(fields::CORE_SIZE, current.core_size, core);
                pool.set_max_size(max)?;
                event.record(fields::MAX_SIZE, current.max_size, max);
            }
        }
        (Some(core), None) => {
            pool.set_core_size(core)?;
            event.record(fields::CORE_SIZE, current.core_size, core);
        }
        (None, Some(max)) => {
            pool.set_max_size(max)?;
            event.record(fields::MAX_SIZE, current.max_size, max);
        }
        (None, None) => {}
    }

    if let Some(allow) = diff.allow_core_timeout {
        pool.set_allow_core_timeout(allow);
        event.record(fields::ALLOW_CORE_TIMEOUT, current.allow_core_timeout, allow);
    }

    if let Some(policy) = diff.reject_policy {
        pool.set_reject_policy(policy)?;
        event.record(fields::REJECT_POLICY, current.reject_policy, policy);
    }

    if let Some(seconds) = diff.keep_alive_seconds {
        pool.set_keep_alive(Duration::from_secs(seconds));
        event.record(fields::KEEP_ALIVE_SECONDS, current.keep_alive_seconds, seconds);
    }

    if let Some(capacity) = diff.queue_capacity {
        if pool.resize_queue(capacity)? {
            event.record(fields::QUEUE_CAPACITY, current.queue_capacity, capacity);
        }
    }

    Ok(())
}

/// One line per refresh: changed fields as `before => after`, the rest as their value
fn log_change(merged: &PoolConfig, event: &ChangeEvent) {
    let describe = |field: &str, value: String| match event.change(field) {
        Some(change) => change.to_string(),
        None => value,
    };

    info!(
        pool_id = %merged.pool_id,
        queue_kind = %merged.queue_kind,
        core_size = %describe(fields::CORE_SIZE, merged.core_size.to_string()),
        max_size = %describe(fields::MAX_SIZE, merged.max_size.to_string()),
        allow_core_timeout = %describe(fields::ALLOW_CORE_TIMEOUT, merged.allow_core_timeout.to_string()),
        reject_policy = %describe(fields::REJECT_POLICY, merged.reject_policy.to_string()),
        keep_alive_seconds = %describe(fields::KEEP_ALIVE_SECONDS, merged.keep_alive_seconds.to_string()),
        queue_capacity = %describe(fields::QUEUE_CAPACITY, merged.queue_capacity.to_string()),
        "Thread pool config changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_ignores_omitted_and_equal_fields() {
        let current = PoolConfig::new("P1", 2, 4);
        let candidate = PoolConfigUpdate::new("P1").with_core_size(2).with_max_size(8);

        let diff = ConfigDiff::compute(&current, &candidate, QueueKind::Resizable);
        assert_eq!(diff.core_size, None);
        assert_eq!(diff.max_size, Some(8));
        assert!(diff.reject_policy.is_none());
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_diff_drops_capacity_for_fixed_queue() {
        let current = PoolConfig::new("P1", 2, 4).with_queue(QueueKind::Array, 100);
        let candidate = PoolConfigUpdate::new("P1").with_queue_capacity(200);

        let diff = ConfigDiff::compute(&current, &candidate, QueueKind::Array);
        assert!(diff.is_empty());

        let merged = diff.merge_into(&current, &candidate);
        assert_eq!(merged.queue_capacity, 100);
    }

    #[test]
    fn test_retain_applied_keeps_only_recorded_fields() {
        let current = PoolConfig::new("P1", 1, 2).with_notify_recipients("alice");
        let candidate = PoolConfigUpdate::new("P1")
            .with_core_size(2)
            .with_max_size(4)
            .with_keep_alive_seconds(5)
            .with_notify_recipients("bob");
        let diff = ConfigDiff::compute(&current, &candidate, QueueKind::Linked);

        let mut event = ChangeEvent::new("P1", QueueKind::Linked);
        event.record(fields::CORE_SIZE, 1, 2);
        event.record(fields::MAX_SIZE, 2, 4);

        let landed = diff
            .retain_applied(&event)
            .merge_into(&current, &PoolConfigUpdate::new("P1"));
        assert_eq!((landed.core_size, landed.max_size), (2, 4));
        assert_eq!(landed.keep_alive_seconds, current.keep_alive_seconds);
        assert_eq!(landed.notify_recipients.as_deref(), Some("alice"));
    }

    #[test]
    fn test_merge_keeps_recipients_unless_supplied() {
        let current = PoolConfig::new("P1", 2, 4).with_notify_recipients("alice");
        let candidate = PoolConfigUpdate::new("P1").with_max_size(6);
        let diff = ConfigDiff::compute(&current, &candidate, QueueKind::Resizable);
        assert_eq!(diff.merge_into(&current, &candidate).notify_recipients.as_deref(), Some("alice"));

        let candidate = candidate.with_notify_recipients("bob");
        assert_eq!(diff.merge_into(&current, &candidate).notify_recipients.as_deref(), Some("bob"));
    }
}
