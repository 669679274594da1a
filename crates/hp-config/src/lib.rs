//! Hotpool Configuration System
//!
//! Bootstrap configuration for the pools a process starts with, where change
//! notifications go, and the environment the notifications describe.
//! TOML file with environment variable overrides.

use std::collections::HashSet;
use std::path::Path;

use hp_common::{PoolConfig, PoolConfigUpdate, QueueKind, RejectPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Master switch; a disabled config registers no pools
    pub enable: bool,

    pub application_name: String,

    /// Deployment profile reported in notifications (dev, test, prod, ...)
    pub active_profile: String,

    /// Host or instance identifier reported in notifications
    pub instance_id: String,

    pub notify: NotifyPlatformsConfig,

    pub executors: Vec<ExecutorConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enable: true,
            application_name: "hotpool".to_string(),
            active_profile: "default".to_string(),
            instance_id: String::new(),
            notify: NotifyPlatformsConfig::default(),
            executors: Vec::new(),
        }
    }
}

/// Where change notifications are delivered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyPlatformsConfig {
    /// Platform name understood by the notifier dispatcher, e.g. `DING`
    pub platform: Option<String>,

    /// Webhook URL for the platform
    pub url: Option<String>,
}

/// One pool definition.
///
/// Tunables are optional so the same shape can describe a partial update.
/// `queue_kind` and `reject_policy` use the configuration tag names
/// (`ResizableCapacityLinkedBlockingQueue`, `CallerRunsPolicy`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub pool_id: String,
    pub core_size: Option<usize>,
    pub max_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub queue_kind: Option<String>,
    pub reject_policy: Option<String>,
    pub keep_alive_seconds: Option<u64>,
    pub allow_core_timeout: Option<bool>,
    pub notify_recipients: Option<String>,
}

impl ExecutorConfig {
    /// Full initial config. `core_size` and `max_size` are required, the rest
    /// fall back to `PoolConfig` defaults.
    pub fn to_pool_config(&self) -> Result<PoolConfig, ConfigError> {
        let core_size = self.core_size.ok_or_else(|| self.missing("core_size"))?;
        let max_size = self.max_size.ok_or_else(|| self.missing("max_size"))?;

        let mut config = PoolConfig::new(self.pool_id.clone(), core_size, max_size);
        if let Some(kind) = self.parse_queue_kind()? {
            config.queue_kind = kind;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(policy) = self.parse_reject_policy()? {
            config.reject_policy = policy;
        }
        if let Some(seconds) = self.keep_alive_seconds {
            config.keep_alive_seconds = seconds;
        }
        if let Some(allow) = self.allow_core_timeout {
            config.allow_core_timeout = allow;
        }
        config.notify_recipients = self.notify_recipients.clone();

        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    /// Candidate for a live refresh carrying only the supplied fields.
    /// `queue_kind` is not part of an update and is ignored here.
    pub fn to_update(&self) -> Result<PoolConfigUpdate, ConfigError> {
        if self.pool_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "executor pool_id must not be empty".to_string(),
            ));
        }
        Ok(PoolConfigUpdate {
            pool_id: self.pool_id.clone(),
            core_size: self.core_size,
            max_size: self.max_size,
            queue_capacity: self.queue_capacity,
            reject_policy: self.parse_reject_policy()?,
            keep_alive_seconds: self.keep_alive_seconds,
            allow_core_timeout: self.allow_core_timeout,
            notify_recipients: self.notify_recipients.clone(),
        })
    }

    fn parse_queue_kind(&self) -> Result<Option<QueueKind>, ConfigError> {
        self.queue_kind
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| ConfigError::ValidationError(format!("[{}] {}", self.pool_id, e)))
    }

    fn parse_reject_policy(&self) -> Result<Option<RejectPolicy>, ConfigError> {
        self.reject_policy
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| ConfigError::ValidationError(format!("[{}] {}", self.pool_id, e)))
    }

    fn missing(&self, field: &str) -> ConfigError {
        ConfigError::ValidationError(format!("[{}] {} is required", self.pool_id, field))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Executor ids are unique and every executor is a valid pool config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for executor in &self.executors {
            if !seen.insert(executor.pool_id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate executor pool_id: {}",
                    executor.pool_id
                )));
            }
            executor.to_pool_config()?;
        }
        Ok(())
    }

    /// Initial configs for every executor, validated
    pub fn pool_configs(&self) -> Result<Vec<PoolConfig>, ConfigError> {
        if !self.enable {
            return Ok(Vec::new());
        }
        self.validate()?;
        self.executors.iter().map(ExecutorConfig::to_pool_config).collect()
    }

    /// Refresh candidates for every executor
    pub fn pool_updates(&self) -> Result<Vec<PoolConfigUpdate>, ConfigError> {
        self.executors.iter().map(ExecutorConfig::to_update).collect()
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Hotpool Configuration
# Environment variables override the top-level and [notify] settings

enable = true
application_name = "orders-service"
active_profile = "dev"
instance_id = ""  # defaults to $HOSTNAME

[notify]
platform = "DING"
url = "https://oapi.dingtalk.com/robot/send?access_token=..."

[[executors]]
pool_id = "order-dispatch"
core_size = 2
max_size = 4
queue_capacity = 1024
queue_kind = "ResizableCapacityLinkedBlockingQueue"
reject_policy = "CallerRunsPolicy"
keep_alive_seconds = 60
allow_core_timeout = false
notify_recipients = "13800000000,13900000000"

[[executors]]
pool_id = "audit-writer"
core_size = 1
max_size = 2
queue_capacity = 256
queue_kind = "ArrayBlockingQueue"
reject_policy = "AbortPolicy"
"#
        .to_string()
    }
}
