use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Contact, ReminderTemplate};

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// `true` once the message was accepted for delivery. Never errors.
    async fn send(&self, recipient: &Contact, template: ReminderTemplate, data: &Value) -> bool;
}

/// Hands notifications to the delivery service over HTTP.
pub struct WebhookNotificationSender {
    client: Client,
    url: String,
    token: String,
}

impl WebhookNotificationSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            url: config.notification_webhook_url.clone(),
            token: config.service_token().to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    async fn send(&self, recipient: &Contact, template: ReminderTemplate, data: &Value) -> bool {
        if self.url.is_empty() {
            warn!("Notification webhook not configured, dropping {} for {}", template, recipient.id);
            return false;
        }

        let body = json!({
            "recipient": recipient,
            "template": template,
            "data": data,
        });

        match self.client.post(&self.url).bearer_auth(&self.token).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Sent {} to {}", template, recipient.id);
                true
            }
            Ok(response) => {
                warn!("Notification {} for {} rejected: {}", template, recipient.id, response.status());
                false
            }
            Err(e) => {
                warn!("Notification {} for {} failed: {}", template, recipient.id, e);
                false
            }
        }
    }
}

/// Records every message instead of delivering it. Used by local runs and tests.
#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<(Contact, ReminderTemplate, Value)>>,
    unreachable: Mutex<HashSet<Uuid>>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later send to this recipient reports failure.
    pub fn fail_for(&self, recipient_id: Uuid) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.insert(recipient_id);
        }
    }

    pub fn sent(&self) -> Vec<(Contact, ReminderTemplate, Value)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send(&self, recipient: &Contact, template: ReminderTemplate, data: &Value) -> bool {
        let unreachable = self
            .unreachable
            .lock()
            .map_or(true, |unreachable| unreachable.contains(&recipient.id));
        if unreachable {
            return false;
        }

        match self.sent.lock() {
            Ok(mut sent) => {
                sent.push((recipient.clone(), template, data.clone()));
                true
            }
            Err(_) => false,
        }
    }
}
