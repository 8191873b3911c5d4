//! Chat-webhook notification channel.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use super::template::render;
use super::{Notification, NotificationChannel, NotifyError};

const DEFAULT_MESSAGE: &str = "DAG {pipeline}: {status}";

/// Posts a JSON payload to an incoming-webhook URL (Slack compatible).
pub struct WebhookChannel {
    name: String,
    url: String,
    message: String,
    username: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a channel posting to `url` with a 10 second request timeout.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(name, url, Duration::from_secs(10))
    }

    /// Create a channel with a custom request timeout.
    pub fn with_timeout(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            message: DEFAULT_MESSAGE.to_string(),
            username: None,
            timeout,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Builder: message template for the `text` field.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Builder: display name for the posting bot.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the JSON payload for `notification`.
    pub fn payload(&self, notification: &Notification) -> Value {
        let mut payload = json!({
            "text": render(&self.message, notification),
            "pipeline": notification.pipeline_id.as_str(),
            "status": notification.status,
            "run_id": notification.run_id.to_string(),
            "failed_tasks": notification
                .failures
                .iter()
                .map(|f| f.task_id.as_str())
                .collect::<Vec<_>>(),
        });
        if let Some(username) = &self.username {
            payload["username"] = Value::String(username.clone());
        }
        payload
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&self.payload(notification))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
