//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "hotpool.toml",
    "config.toml",
    "./config/hotpool.toml",
    "./config/config.toml",
    "/etc/hotpool/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        } else {
            debug!("No configuration file found, using defaults");
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("HOTPOOL_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("HOTPOOL_ENABLE") {
            match parse_flag(&val) {
                Some(enable) => config.enable = enable,
                None => warn!(
                    value = %val,
                    enable = config.enable,
                    "Invalid HOTPOOL_ENABLE value ignored"
                ),
            }
        }
        if let Ok(val) = env::var("HOTPOOL_APPLICATION_NAME") {
            config.application_name = val;
        }
        if let Ok(val) = env::var("HOTPOOL_ACTIVE_PROFILE") {
            config.active_profile = val;
        }
        if let Ok(val) = env::var("HOTPOOL_INSTANCE_ID") {
            config.instance_id = val;
        }

        // Notification
        if let Ok(val) = env::var("HOTPOOL_NOTIFY_PLATFORM") {
            config.notify.platform = Some(val);
        }
        if let Ok(val) = env::var("HOTPOOL_NOTIFY_URL") {
            config.notify.url = Some(val);
        }

        if config.instance_id.is_empty() {
            config.instance_id = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `true`/`false` (any case) or `1`/`0`
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
