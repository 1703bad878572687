//! Best-effort run notifications.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _text: &str) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Posts `{"text": ...}` to a chat-style incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotificationError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotificationError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Never fails: notifier errors are logged and dropped.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(err) = notifier.notify(text).await {
        warn!(error = %err, "notification failed");
    }
}
