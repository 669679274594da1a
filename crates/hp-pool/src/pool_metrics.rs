//! Metrics for live pools and their reconfiguration
//!
//! Recorded through the `metrics` facade; the host process installs whichever
//! exporter it uses.

use metrics::{counter, gauge};

/// Record the outcome of one refresh (`applied`, `unchanged`, `not_found`, `failed`)
pub fn record_refresh(pool_id: &str, outcome: &str) {
    counter!(
        "hp_refresh_total",
        "pool" => pool_id.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Update core and max size gauges
pub fn set_pool_sizes(pool_id: &str, core_size: usize, max_size: usize) {
    gauge!(
        "hp_pool_core_size",
        "pool" => pool_id.to_string()
    )
    .set(core_size as f64);

    gauge!(
        "hp_pool_max_size",
        "pool" => pool_id.to_string()
    )
    .set(max_size as f64);
}

/// Update queue capacity gauge. Unbounded queues are not reported.
pub fn set_queue_capacity(pool_id: &str, capacity: Option<usize>) {
    if let Some(capacity) = capacity {
        gauge!(
            "hp_queue_capacity",
            "pool" => pool_id.to_string()
        )
        .set(capacity as f64);
    }
}

/// Record a task handed to the reject policy
pub fn record_task_rejected(pool_id: &str, policy: &str) {
    counter!(
        "hp_tasks_rejected_total",
        "pool" => pool_id.to_string(),
        "policy" => policy.to_string()
    )
    .increment(1);
}
