//! In-memory HealthRepository.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::domain::errors::SupervisorResult;
use crate::domain::models::{HealthRecord, ProbeResult};
use crate::domain::ports::HealthRepository;

/// Health state that lives only as long as the process.
#[derive(Default)]
pub struct InMemoryHealthRepository {
    records: RwLock<BTreeMap<String, HealthRecord>>,
    /// Oldest first
    probes: RwLock<HashMap<String, VecDeque<ProbeResult>>>,
}

impl InMemoryHealthRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of probe results held for a service.
    pub async fn probe_count(&self, service_id: &str) -> usize {
        self.probes
            .read()
            .await
            .get(service_id)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl HealthRepository for InMemoryHealthRepository {
    async fn load_all(&self) -> SupervisorResult<Vec<HealthRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save_record(&self, record: &HealthRecord) -> SupervisorResult<()> {
        self.records
            .write()
            .await
            .insert(record.service_id.clone(), record.clone());
        Ok(())
    }

    async fn append_probe(&self, result: &ProbeResult) -> SupervisorResult<()> {
        self.probes
            .write()
            .await
            .entry(result.service_id.clone())
            .or_default()
            .push_back(result.clone());
        Ok(())
    }

    async fn recent_probes(&self, service_id: &str, limit: usize) -> SupervisorResult<Vec<ProbeResult>> {
        let probes = self.probes.read().await;
        Ok(probes
            .get(service_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn prune_probes(&self, service_id: &str, keep: usize) -> SupervisorResult<u64> {
        let mut probes = self.probes.write().await;
        let Some(history) = probes.get_mut(service_id) else {
            return Ok(0);
        };

        let excess = history.len().saturating_sub(keep);
        history.drain(..excess);
        Ok(excess as u64)
    }
}
