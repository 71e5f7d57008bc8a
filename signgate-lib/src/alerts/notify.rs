use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::rule::Alert;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification endpoint answered {0}")]
    Rejected(u16),
}

/// Receives fired alerts. Delivery is best-effort; callers only log failures.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        warn!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            rule_type = %alert.rule_type,
            value = alert.value,
            threshold = alert.threshold,
            "ALERT: {}",
            alert.message
        );
        Ok(())
    }
}

/// POSTs each alert as JSON to a fixed URL
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), url: url.into(), auth_token, timeout }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).timeout(self.timeout).json(alert);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        debug!(alert_id = %alert.id, url = %self.url, "alert delivered to webhook");
        Ok(())
    }
}

/// Delivers to every inner sink, reporting the first failure
pub struct FanoutNotificationSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutNotificationSink {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutNotificationSink {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(alert).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
