//! Health state repository port.

use async_trait::async_trait;

use crate::domain::errors::SupervisorResult;
use crate::domain::models::{HealthRecord, ProbeResult};

/// Durable storage for health records and probe history.
#[async_trait]
pub trait HealthRepository: Send + Sync {
    /// Load every persisted health record.
    async fn load_all(&self) -> SupervisorResult<Vec<HealthRecord>>;

    /// Insert or replace the record for `record.service_id`.
    async fn save_record(&self, record: &HealthRecord) -> SupervisorResult<()>;

    /// Append one probe result to the service's history.
    async fn append_probe(&self, result: &ProbeResult) -> SupervisorResult<()>;

    /// Most recent probe results for a service, newest first.
    async fn recent_probes(&self, service_id: &str, limit: usize) -> SupervisorResult<Vec<ProbeResult>>;

    /// Drop all but the `keep` most recent probe results for a service.
    async fn prune_probes(&self, service_id: &str, keep: usize) -> SupervisorResult<u64>;
}
