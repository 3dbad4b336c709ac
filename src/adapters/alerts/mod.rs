//! Alert sink implementations.

pub mod log;
pub mod webhook;

pub use log::LogAlertSink;
pub use webhook::WebhookAlertSink;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::AlertSinkConfig;
use crate::domain::ports::{Alert, AlertSink};

/// Fans an alert out to every inner sink.
///
/// All sinks are attempted even if some fail; the failures are folded into
/// a single `AlertDelivery` error.
#[derive(Clone, Default)]
pub struct CompositeAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl CompositeAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for CompositeAlertSink {
    async fn notify(&self, alert: &Alert) -> SupervisorResult<()> {
        let results = futures::future::join_all(self.sinks.iter().map(|sink| sink.notify(alert))).await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::AlertDelivery(failures.join("; ")))
        }
    }
}

/// Build the configured sink. With nothing configured, alerts go to the log.
pub fn build_alert_sink(configs: &[AlertSinkConfig]) -> Arc<dyn AlertSink> {
    if configs.is_empty() {
        return Arc::new(LogAlertSink);
    }

    let sinks = configs
        .iter()
        .map(|config| -> Arc<dyn AlertSink> {
            match config {
                AlertSinkConfig::Log => Arc::new(LogAlertSink),
                AlertSinkConfig::Webhook { url, timeout_ms } => {
                    Arc::new(WebhookAlertSink::new(url.clone(), Duration::from_millis(*timeout_ms)))
                }
            }
        })
        .collect();

    Arc::new(CompositeAlertSink::new(sinks))
}
