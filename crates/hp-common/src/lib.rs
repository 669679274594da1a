use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

// ============================================================================
// Tag Parsing
// ============================================================================

/// Errors raised when a configuration tag does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No matching type of rejected execution was found: {0}")]
    InvalidPolicy(String),

    #[error("No matching type of blocking queue was found: {0}")]
    InvalidQueueKind(String),
}

/// Kind of work queue backing a pool.
///
/// Only `Resizable` supports changing capacity while the pool is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QueueKind {
    Array,
    Linked,
    LinkedDeque,
    Synchronous,
    Transfer,
    PriorityLinked,
    Resizable,
}

impl QueueKind {
    pub const ALL: [QueueKind; 7] = [
        QueueKind::Array,
        QueueKind::Linked,
        QueueKind::LinkedDeque,
        QueueKind::Synchronous,
        QueueKind::Transfer,
        QueueKind::PriorityLinked,
        QueueKind::Resizable,
    ];

    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Array => "ArrayBlockingQueue",
            QueueKind::Linked => "LinkedBlockingQueue",
            QueueKind::LinkedDeque => "LinkedBlockingDeque",
            QueueKind::Synchronous => "SynchronousQueue",
            QueueKind::Transfer => "LinkedTransferQueue",
            QueueKind::PriorityLinked => "PriorityBlockingQueue",
            QueueKind::Resizable => "ResizableCapacityLinkedBlockingQueue",
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            QueueKind::Array => "Array",
            QueueKind::Linked => "Linked",
            QueueKind::LinkedDeque => "LinkedDeque",
            QueueKind::Synchronous => "Synchronous",
            QueueKind::Transfer => "Transfer",
            QueueKind::PriorityLinked => "PriorityLinked",
            QueueKind::Resizable => "Resizable",
        }
    }

    pub fn is_resizable(&self) -> bool {
        matches!(self, QueueKind::Resizable)
    }

    /// Whether `queue_capacity` bounds this kind at all.
    /// Handoff and transfer queues ignore the configured capacity.
    pub fn uses_capacity(&self) -> bool {
        !matches!(self, QueueKind::Synchronous | QueueKind::Transfer)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueueKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        QueueKind::ALL
            .into_iter()
            .find(|kind| kind.name() == tag || kind.variant_name().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ParseError::InvalidQueueKind(s.to_string()))
    }
}

impl TryFrom<String> for QueueKind {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueueKind> for String {
    fn from(kind: QueueKind) -> Self {
        kind.name().to_string()
    }
}

/// Behavior when a pool is saturated and a new task arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RejectPolicy {
    /// Refuse the task and report the rejection to the submitter
    #[default]
    AbortOnFull,
    /// Run the task on the submitting thread
    RunByCaller,
    /// Silently drop the incoming task
    DropNewest,
    /// Drop the oldest queued task and retry the submission
    DropOldest,
}

impl RejectPolicy {
    pub const ALL: [RejectPolicy; 4] = [
        RejectPolicy::AbortOnFull,
        RejectPolicy::RunByCaller,
        RejectPolicy::DropNewest,
        RejectPolicy::DropOldest,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RejectPolicy::AbortOnFull => "AbortPolicy",
            RejectPolicy::RunByCaller => "CallerRunsPolicy",
            RejectPolicy::DropNewest => "DiscardPolicy",
            RejectPolicy::DropOldest => "DiscardOldestPolicy",
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            RejectPolicy::AbortOnFull => "AbortOnFull",
            RejectPolicy::RunByCaller => "RunByCaller",
            RejectPolicy::DropNewest => "DropNewest",
            RejectPolicy::DropOldest => "DropOldest",
        }
    }
}

impl fmt::Display for RejectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RejectPolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        RejectPolicy::ALL
            .into_iter()
            .find(|policy| policy.name() == tag || policy.variant_name().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ParseError::InvalidPolicy(s.to_string()))
    }
}

impl TryFrom<String> for RejectPolicy {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RejectPolicy> for String {
    fn from(policy: RejectPolicy) -> Self {
        policy.name().to_string()
    }
}

// ============================================================================
// Pool Configuration
// ============================================================================

/// Snapshot of a pool's tunable parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: String,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub queue_kind: QueueKind,
    pub reject_policy: RejectPolicy,
    pub keep_alive_seconds: u64,
    pub allow_core_timeout: bool,
    #[serde(default)]
    pub notify_recipients: Option<String>,
}

impl PoolConfig {
    pub fn new(pool_id: impl Into<String>, core_size: usize, max_size: usize) -> Self {
        Self {
            pool_id: pool_id.into(),
            core_size,
            max_size,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_kind: QueueKind::Resizable,
            reject_policy: RejectPolicy::default(),
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            allow_core_timeout: false,
            notify_recipients: None,
        }
    }

    pub fn with_queue(mut self, kind: QueueKind, capacity: usize) -> Self {
        self.queue_kind = kind;
        self.queue_capacity = capacity;
        self
    }

    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = policy;
        self
    }

    pub fn with_keep_alive_seconds(mut self, seconds: u64) -> Self {
        self.keep_alive_seconds = seconds;
        self
    }

    pub fn with_allow_core_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = allow;
        self
    }

    pub fn with_notify_recipients(mut self, recipients: impl Into<String>) -> Self {
        self.notify_recipients = Some(recipients.into());
        self
    }

    /// Check the invariants a fully applied config must hold.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_id.trim().is_empty() {
            return Err("pool_id must not be empty".to_string());
        }
        if self.max_size == 0 {
            return Err(format!("[{}] max_size must be greater than 0", self.pool_id));
        }
        if self.core_size > self.max_size {
            return Err(format!(
                "[{}] core_size {} exceeds max_size {}",
                self.pool_id, self.core_size, self.max_size
            ));
        }
        if self.queue_kind.uses_capacity() && self.queue_capacity == 0 {
            return Err(format!(
                "[{}] queue_capacity must be greater than 0 for {}",
                self.pool_id, self.queue_kind
            ));
        }
        Ok(())
    }
}

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 60;

/// Candidate configuration handed to the reconfiguration engine.
///
/// `None` means the field was not supplied and must be left untouched.
/// The queue kind is absent on purpose: a live queue cannot change kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfigUpdate {
    pub pool_id: String,
    #[serde(default)]
    pub core_size: Option<usize>,
    #[serde(default)]
    pub max_size: Option<usize>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub reject_policy: Option<RejectPolicy>,
    #[serde(default)]
    pub keep_alive_seconds: Option<u64>,
    #[serde(default)]
    pub allow_core_timeout: Option<bool>,
    #[serde(default)]
    pub notify_recipients: Option<String>,
}

impl PoolConfigUpdate {
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            ..Default::default()
        }
    }

    pub fn with_core_size(mut self, core_size: usize) -> Self {
        self.core_size = Some(core_size);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = Some(policy);
        self
    }

    pub fn with_keep_alive_seconds(mut self, seconds: u64) -> Self {
        self.keep_alive_seconds = Some(seconds);
        self
    }

    pub fn with_allow_core_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = Some(allow);
        self
    }

    pub fn with_notify_recipients(mut self, recipients: impl Into<String>) -> Self {
        self.notify_recipients = Some(recipients.into());
        self
    }
}

impl From<PoolConfig> for PoolConfigUpdate {
    fn from(config: PoolConfig) -> Self {
        Self {
            pool_id: config.pool_id,
            core_size: Some(config.core_size),
            max_size: Some(config.max_size),
            queue_capacity: Some(config.queue_capacity),
            reject_policy: Some(config.reject_policy),
            keep_alive_seconds: Some(config.keep_alive_seconds),
            allow_core_timeout: Some(config.allow_core_timeout),
            notify_recipients: config.notify_recipients,
        }
    }
}

// ============================================================================
// Change Events
// ============================================================================

/// Names of the fields a reconfiguration can change, in apply order.
pub mod fields {
    pub const CORE_SIZE: &str = "core_size";
    pub const MAX_SIZE: &str = "max_size";
    pub const ALLOW_CORE_TIMEOUT: &str = "allow_core_timeout";
    pub const REJECT_POLICY: &str = "reject_policy";
    pub const KEEP_ALIVE_SECONDS: &str = "keep_alive_seconds";
    pub const QUEUE_CAPACITY: &str = "queue_capacity";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePair {
    pub before: String,
    pub after: String,
}

impl ChangePair {
    pub fn new(before: impl ToString, after: impl ToString) -> Self {
        Self {
            before: before.to_string(),
            after: after.to_string(),
        }
    }
}

impl fmt::Display for ChangePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.before, self.after)
    }
}

/// Record of one successful reconfiguration. Only changed fields are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub pool_id: String,
    pub queue_kind: QueueKind,
    pub notify_recipients: Option<String>,
    pub changes: IndexMap<String, ChangePair>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(pool_id: impl Into<String>, queue_kind: QueueKind) -> Self {
        Self {
            pool_id: pool_id.into(),
            queue_kind,
            notify_recipients: None,
            changes: IndexMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn record(&mut self, field: &str, before: impl ToString, after: impl ToString) {
        self.changes.insert(field.to_string(), ChangePair::new(before, after));
    }

    pub fn change(&self, field: &str) -> Option<&ChangePair> {
        self.changes.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
