//! Change notifications
//!
//! Provides:
//! - `ChangeNotifier`: fire-and-forget sink the reconfiguration engine pushes events into
//! - `NotifierDispatcher`: routes events to a platform service by name, delivering on tokio
//! - `DingTalkNotifierService`: DingTalk robot webhook with markdown messages
//! - `NoOpNotifierService`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hp_common::ChangeEvent;
use hp_config::AppConfig;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

pub const DING_PLATFORM: &str = "DING";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification platform returned error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Webhook URL not configured")]
    MissingUrl,
}

/// Sink for change events. Never fails; delivery problems are logged.
pub trait ChangeNotifier: Send + Sync {
    fn dispatch(&self, event: &ChangeEvent, destination: &str);
}

/// Environment a change happened in, rendered into every message
#[derive(Debug, Clone, Default)]
pub struct NotifyContext {
    pub active_profile: String,
    pub application_name: String,
    pub instance_id: String,
}

impl NotifyContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            active_profile: config.active_profile.clone(),
            application_name: config.application_name.clone(),
            instance_id: config.instance_id.clone(),
        }
    }
}

/// A change event with its environment
#[derive(Debug, Clone)]
pub struct ChangeMessage {
    pub event: ChangeEvent,
    pub context: NotifyContext,
}

impl ChangeMessage {
    /// Mobile numbers to mention, from the comma-separated recipients
    pub fn recipients(&self) -> Vec<String> {
        self.event
            .notify_recipients
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Delivery to one notification platform
#[async_trait]
pub trait NotifierService: Send + Sync {
    async fn send_change_message(&self, message: &ChangeMessage) -> Result<(), NotifyError>;

    /// Platform name this service is registered under
    fn platform(&self) -> &str;
}

pub struct NoOpNotifierService;

#[async_trait]
impl NotifierService for NoOpNotifierService {
    async fn send_change_message(&self, _message: &ChangeMessage) -> Result<(), NotifyError> {
        Ok(())
    }

    fn platform(&self) -> &str {
        "NOOP"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DingRobotResponse {
    errcode: i64,
    errmsg: String,
}

/// DingTalk robot webhook
pub struct DingTalkNotifierService {
    client: reqwest::Client,
    webhook_url: String,
}

impl DingTalkNotifierService {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotifyError> {
        let webhook_url = webhook_url.into();
        if webhook_url.trim().is_empty() {
            return Err(NotifyError::MissingUrl);
        }
        info!("DingTalkNotifierService initialized");
        Ok(Self {
            client: reqwest::Client::new(),
            webhook_url,
        })
    }

    fn build_markdown(&self, message: &ChangeMessage) -> String {
        let event = &message.event;
        let context = &message.context;

        let mut text = format!(
            "**<font color='#2a9d8f'>[{}] Dynamic thread pool parameter change</font>**\n\n ---\n\n",
            context.active_profile.to_uppercase()
        );
        text.push_str(&format!(
            "<font color='#708090' size=2>Pool ID: {}</font>\n\n",
            event.pool_id
        ));
        text.push_str(&format!(
            "<font color='#708090' size=2>Instance: {}:{}</font>\n\n",
            context.instance_id, context.application_name
        ));
        text.push_str(&format!(
            "<font color='#708090' size=2>Work queue: {}</font>\n\n",
            event.queue_kind
        ));
        for (field, change) in &event.changes {
            text.push_str(&format!(
                "<font color='#708090' size=2>{}: {}</font>\n\n",
                field, change
            ));
        }

        let mentions: Vec<String> = message.recipients().iter().map(|m| format!("@{m}")).collect();
        if !mentions.is_empty() {
            text.push_str(&format!(
                "<font color='#708090' size=2>Recipients: {}</font>\n\n",
                mentions.join(" ")
            ));
        }
        text.push_str(&format!(
            " ---\n\n<font color='#708090' size=2>Changed at: {}</font>\n",
            event.timestamp.format("%Y-%m-%d %H:%M:%S")
        ));
        text
    }

    fn build_payload(&self, message: &ChangeMessage) -> serde_json::Value {
        json!({
            "msgtype": "markdown",
            "markdown": {
                "title": "Dynamic thread pool notice",
                "text": self.build_markdown(message)
            },
            "at": {
                "atMobiles": message.recipients(),
                "isAtAll": false
            }
        })
    }
}

#[async_trait]
impl NotifierService for DingTalkNotifierService {
    async fn send_change_message(&self, message: &ChangeMessage) -> Result<(), NotifyError> {
        let payload = self.build_payload(message);
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: DingRobotResponse = response.json().await?;
        if body.errcode != 0 {
            return Err(NotifyError::Remote {
                code: body.errcode,
                message: body.errmsg,
            });
        }
        Ok(())
    }

    fn platform(&self) -> &str {
        DING_PLATFORM
    }
}

/// Routes change events to the service registered for the destination platform.
///
/// Delivery runs on a tokio runtime: the handle given to `with_runtime`, or
/// the runtime the caller is on. Without either, the event is dropped with a
/// warning.
#[derive(Default)]
pub struct NotifierDispatcher {
    services: HashMap<String, Arc<dyn NotifierService>>,
    context: NotifyContext,
    runtime: Option<Handle>,
}

impl NotifierDispatcher {
    pub fn new(context: NotifyContext) -> Self {
        Self {
            services: HashMap::new(),
            context,
            runtime: None,
        }
    }

    /// Dispatcher for the configured platform. An unknown platform or a
    /// missing webhook URL leaves the table empty.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut dispatcher = Self::new(NotifyContext::from_config(config));

        let Some(platform) = config.notify.platform.as_deref() else {
            info!("No notification platform configured");
            return dispatcher;
        };

        if platform.eq_ignore_ascii_case(DING_PLATFORM) {
            match DingTalkNotifierService::new(config.notify.url.clone().unwrap_or_default()) {
                Ok(service) => dispatcher.register(Arc::new(service)),
                Err(e) => warn!(platform = %platform, error = %e, "DingTalk notifications skipped"),
            }
        } else {
            warn!(platform = %platform, "Unknown notification platform - skipping");
        }
        dispatcher
    }

    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn with_platform(mut self, service: Arc<dyn NotifierService>) -> Self {
        self.register(service);
        self
    }

    pub fn register(&mut self, service: Arc<dyn NotifierService>) {
        let platform = service.platform().to_ascii_uppercase();
        info!(platform = %platform, "Registered notifier service");
        self.services.insert(platform, service);
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.services.keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn context(&self) -> &NotifyContext {
        &self.context
    }
}

impl ChangeNotifier for NotifierDispatcher {
    fn dispatch(&self, event: &ChangeEvent, destination: &str) {
        let Some(service) = self.services.get(&destination.to_ascii_uppercase()).cloned() else {
            debug!(destination = %destination, pool_id = %event.pool_id, "No notifier for destination");
            return;
        };

        let Some(handle) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!(
                destination = %destination,
                pool_id = %event.pool_id,
                "No tokio runtime available - change notification dropped"
            );
            return;
        };

        let message = ChangeMessage {
            event: event.clone(),
            context: self.context.clone(),
        };
        let destination = destination.to_string();

        handle.spawn(async move {
            match service.send_change_message(&message).await {
                Ok(()) => info!(
                    destination = %destination,
                    pool_id = %message.event.pool_id,
                    "Change notification sent"
                ),
                Err(e) => error!(
                    destination = %destination,
                    pool_id = %message.event.pool_id,
                    error = %e,
                    "Failed to send change notification"
                ),
            }
        });
    }
}
