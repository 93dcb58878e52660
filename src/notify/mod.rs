//! Notification capability.
//!
//! Notifications are best effort: [`deliver`] logs and swallows failures so a
//! broken webhook never fails a cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use crate::config::SprintlineConfig;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// Send and log any failure instead of returning it.
pub async fn deliver(notifier: &dyn Notifier, message: &str) {
    if let Err(e) = notifier.send(message).await {
        tracing::warn!(error = %e, "Notification not delivered");
    }
}

/// Slack incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .context("Failed to reach Slack webhook")?
            .error_for_status()
            .context("Slack webhook returned error status")?;
        Ok(())
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        tracing::info!(notification = message, "Notification");
        Ok(())
    }
}

/// Slack when `SLACK_WEBHOOK_URL` is set, otherwise the log.
pub fn from_config(config: &SprintlineConfig) -> Arc<dyn Notifier> {
    match &config.credentials.slack_webhook_url {
        Some(url) => match SlackNotifier::new(url.clone()) {
            Ok(slack) => Arc::new(slack),
            Err(e) => {
                tracing::warn!(error = %e, "Slack notifier disabled");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    }
}

/// Keeps every message; optionally fails each send.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub messages: std::sync::Mutex<Vec<String>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            anyhow::bail!("webhook down");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_swallows_failures() {
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        deliver(&notifier, "bucket over capacity").await;
        assert_eq!(notifier.messages(), vec!["bucket over capacity"]);
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        assert!(LogNotifier.send("hello").await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error_not_a_panic() {
        let slack = SlackNotifier::new("http://127.0.0.1:9/hook").unwrap();
        assert!(slack.send("hi").await.is_err());
    }
}
