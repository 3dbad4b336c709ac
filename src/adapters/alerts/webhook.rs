//! Webhook alert sink.
//!
//! POSTs the alert as JSON. Any non-2xx response or transport error is an
//! [`SupervisorError::AlertDelivery`].

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::ports::{Alert, AlertSink};

#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    http: Client,
    url: String,
    timeout: Duration,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, alert: &Alert) -> SupervisorResult<()> {
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(alert)
            .send()
            .await
            .map_err(|e| SupervisorError::AlertDelivery(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SupervisorError::AlertDelivery(format!(
                "POST {} returned {status}",
                self.url
            )));
        }

        tracing::debug!(service_id = %alert.service_id, url = %self.url, "alert delivered to webhook");
        Ok(())
    }
}
