//! Health State Store.
//!
//! Owns every [`HealthRecord`]. Writers for the same service are serialized
//! through a per-service slot; different services update in parallel. Each
//! update is persisted before it becomes visible in [`HealthStateStore::snapshot`].

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

use super::descriptor_store::DescriptorStore;
use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::{HealthRecord, ProbeResult, RestartPolicy, ServiceState};
use crate::domain::ports::HealthRepository;

struct Slot {
    record: Mutex<HealthRecord>,
    policy: RestartPolicy,
}

pub struct HealthStateStore {
    repo: Arc<dyn HealthRepository>,
    slots: HashMap<String, Slot>,
    published: RwLock<BTreeMap<String, HealthRecord>>,
    history_len: usize,
}

impl HealthStateStore {
    /// Load persisted records for every configured service. Services without
    /// history start from an empty record.
    pub async fn open(
        repo: Arc<dyn HealthRepository>,
        descriptors: &DescriptorStore,
        history_len: usize,
    ) -> SupervisorResult<Self> {
        let mut persisted: HashMap<String, HealthRecord> = repo
            .load_all()
            .await?
            .into_iter()
            .map(|r| (r.service_id.clone(), r))
            .collect();

        let mut slots = HashMap::new();
        let mut published = BTreeMap::new();
        for id in descriptors.ids() {
            let Some(descriptor) = descriptors.get(id) else {
                continue;
            };
            let record = persisted.remove(id).unwrap_or_else(|| HealthRecord::new(id));
            if record.consecutive_failures > 0 || record.restart_count > 0 {
                tracing::info!(
                    service_id = id,
                    consecutive_failures = record.consecutive_failures,
                    restart_count = record.restart_count,
                    "restored failure history"
                );
            }
            published.insert(id.to_string(), record.clone());
            slots.insert(
                id.to_string(),
                Slot {
                    record: Mutex::new(record),
                    policy: descriptor.restart_policy.clone(),
                },
            );
        }

        for stale in persisted.keys() {
            tracing::debug!(service_id = %stale, "ignoring health record for unconfigured service");
        }

        Ok(Self {
            repo,
            slots,
            published: RwLock::new(published),
            history_len,
        })
    }

    /// Fold one probe result into the service's record and persist both.
    pub async fn record(&self, result: &ProbeResult) -> SupervisorResult<HealthRecord> {
        let slot = self.slot(&result.service_id)?;
        let mut current = slot.record.lock().await;

        let mut next = current.clone();
        next.apply(result, &slot.policy);

        self.repo.append_probe(result).await?;
        self.repo.save_record(&next).await?;
        self.repo.prune_probes(&result.service_id, self.history_len).await?;

        *current = next.clone();
        self.publish(&next);
        Ok(next)
    }

    /// Count a restart against the service's flap window.
    pub async fn note_restart(&self, service_id: &str, at: DateTime<Utc>) -> SupervisorResult<HealthRecord> {
        self.update(service_id, |record| record.note_restart(at)).await
    }

    /// Persist the service's lifecycle state.
    pub async fn set_state(&self, service_id: &str, state: ServiceState) -> SupervisorResult<HealthRecord> {
        self.update(service_id, |record| {
            record.state = state;
            record.updated_at = Utc::now();
        })
        .await
    }

    async fn update<F>(&self, service_id: &str, f: F) -> SupervisorResult<HealthRecord>
    where
        F: FnOnce(&mut HealthRecord) + Send,
    {
        let slot = self.slot(service_id)?;
        let mut current = slot.record.lock().await;

        let mut next = current.clone();
        f(&mut next);
        self.repo.save_record(&next).await?;

        *current = next.clone();
        self.publish(&next);
        Ok(next)
    }

    /// Every record as of the last committed update. Never waits on writers.
    pub fn snapshot(&self) -> BTreeMap<String, HealthRecord> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, service_id: &str) -> Option<HealthRecord> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_id)
            .cloned()
    }

    /// Most recent probe results, newest first.
    pub async fn recent_history(&self, service_id: &str, limit: usize) -> SupervisorResult<Vec<ProbeResult>> {
        self.repo.recent_probes(service_id, limit).await
    }

    pub const fn history_len(&self) -> usize {
        self.history_len
    }

    fn slot(&self, service_id: &str) -> SupervisorResult<&Slot> {
        self.slots
            .get(service_id)
            .ok_or_else(|| SupervisorError::UnknownService(service_id.to_string()))
    }

    fn publish(&self, record: &HealthRecord) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.service_id.clone(), record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryHealthRepository;
    use crate::domain::models::{ProbeOutcome, ServiceDescriptor};
    use async_trait::async_trait;

    fn descriptors() -> DescriptorStore {
        DescriptorStore::new(vec![
            ServiceDescriptor::new("db", "postgres"),
            ServiceDescriptor::new("api", "api").depends_on("db"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_record_updates_snapshot_and_history() {
        let repo = Arc::new(InMemoryHealthRepository::new());
        let store = HealthStateStore::open(repo.clone(), &descriptors(), 2).await.unwrap();

        store.record(&ProbeResult::unhealthy("db", "refused")).await.unwrap();
        store.record(&ProbeResult::unhealthy("db", "refused")).await.unwrap();
        let record = store.record(&ProbeResult::healthy("db", "ok")).await.unwrap();

        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.consecutive_successes, 1);
        assert_eq!(store.snapshot()["db"], record);
        assert_eq!(repo.probe_count("db").await, 2);

        let history = store.recent_history("db", 10).await.unwrap();
        assert_eq!(history[0].outcome, ProbeOutcome::Healthy);
    }

    #[tokio::test]
    async fn test_failure_history_survives_reopen() {
        let repo = Arc::new(InMemoryHealthRepository::new());
        {
            let store = HealthStateStore::open(repo.clone(), &descriptors(), 10).await.unwrap();
            store.record(&ProbeResult::unhealthy("api", "500")).await.unwrap();
            store.record(&ProbeResult::unhealthy("api", "500")).await.unwrap();
            store.note_restart("api", Utc::now()).await.unwrap();
        }

        let reopened = HealthStateStore::open(repo, &descriptors(), 10).await.unwrap();
        let record = reopened.get("api").unwrap();
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.restart_count, 1);
        assert_eq!(reopened.get("db").unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_unknown_service_rejected() {
        let store = HealthStateStore::open(Arc::new(InMemoryHealthRepository::new()), &descriptors(), 10)
            .await
            .unwrap();
        let err = store.record(&ProbeResult::healthy("redis", "ok")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownService(_)));
    }

    #[tokio::test]
    async fn test_concurrent_updates_for_one_service_are_serialized() {
        let store = Arc::new(
            HealthStateStore::open(Arc::new(InMemoryHealthRepository::new()), &descriptors(), 100)
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record(&ProbeResult::unhealthy("api", "500")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("api").unwrap().consecutive_failures, 20);
    }

    struct BrokenRepository;

    #[async_trait]
    impl HealthRepository for BrokenRepository {
        async fn load_all(&self) -> SupervisorResult<Vec<HealthRecord>> {
            Ok(Vec::new())
        }
        async fn save_record(&self, _record: &HealthRecord) -> SupervisorResult<()> {
            Err(SupervisorError::Storage("disk full".into()))
        }
        async fn append_probe(&self, _result: &ProbeResult) -> SupervisorResult<()> {
            Ok(())
        }
        async fn recent_probes(&self, _id: &str, _limit: usize) -> SupervisorResult<Vec<ProbeResult>> {
            Ok(Vec::new())
        }
        async fn prune_probes(&self, _id: &str, _keep: usize) -> SupervisorResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_published() {
        let store = HealthStateStore::open(Arc::new(BrokenRepository), &descriptors(), 10)
            .await
            .unwrap();
        let err = store.record(&ProbeResult::unhealthy("db", "refused")).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(store.get("db").unwrap().consecutive_failures, 0);
    }
}
