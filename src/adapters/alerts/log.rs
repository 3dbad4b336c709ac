//! Alert sink that writes escalations to the error log.

use async_trait::async_trait;

use crate::domain::errors::SupervisorResult;
use crate::domain::ports::{Alert, AlertSink};

/// Emits each alert as a `tracing` error event. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: &Alert) -> SupervisorResult<()> {
        let last_detail = alert.recent_history.first().map(|r| r.detail.as_str());
        tracing::error!(
            service_id = %alert.service_id,
            reason = %alert.reason,
            history_len = alert.recent_history.len(),
            last_detail = last_detail.unwrap_or("none"),
            "service escalated, manual intervention required"
        );
        Ok(())
    }
}
