//! SQLite implementation of the HealthRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{parse_datetime, parse_optional_datetime};
use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::{HealthRecord, ProbeOutcome, ProbeResult, ServiceState};
use crate::domain::ports::HealthRepository;

pub struct SqliteHealthRepository {
    pool: SqlitePool,
}

impl SqliteHealthRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthRepository for SqliteHealthRepository {
    async fn load_all(&self) -> SupervisorResult<Vec<HealthRecord>> {
        let rows: Vec<HealthRecordRow> = sqlx::query_as(
            "SELECT * FROM health_records ORDER BY service_id"
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_record(&self, record: &HealthRecord) -> SupervisorResult<()> {
        sqlx::query(
            r"INSERT INTO health_records (service_id, consecutive_failures, consecutive_successes, last_healthy_at, last_restart_at,
                   restart_count, total_restarts, degraded_since, last_outcome, last_detail, last_probe_at, state, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(service_id) DO UPDATE SET
                   consecutive_failures = excluded.consecutive_failures,
                   consecutive_successes = excluded.consecutive_successes,
                   last_healthy_at = excluded.last_healthy_at,
                   last_restart_at = excluded.last_restart_at,
                   restart_count = excluded.restart_count,
                   total_restarts = excluded.total_restarts,
                   degraded_since = excluded.degraded_since,
                   last_outcome = excluded.last_outcome,
                   last_detail = excluded.last_detail,
                   last_probe_at = excluded.last_probe_at,
                   state = excluded.state,
                   updated_at = excluded.updated_at"
        )
        .bind(&record.service_id)
        .bind(i64::from(record.consecutive_failures))
        .bind(i64::from(record.consecutive_successes))
        .bind(record.last_healthy_at.map(|dt| dt.to_rfc3339()))
        .bind(record.last_restart_at.map(|dt| dt.to_rfc3339()))
        .bind(i64::from(record.restart_count))
        .bind(i64::try_from(record.total_restarts).unwrap_or(i64::MAX))
        .bind(record.degraded_since.map(|dt| dt.to_rfc3339()))
        .bind(record.last_outcome.map(|o| o.as_str()))
        .bind(&record.last_detail)
        .bind(record.last_probe_at.map(|dt| dt.to_rfc3339()))
        .bind(record.state.as_str())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_probe(&self, result: &ProbeResult) -> SupervisorResult<()> {
        sqlx::query(
            "INSERT INTO probe_results (service_id, timestamp, outcome, latency_ms, detail) VALUES (?, ?, ?, ?, ?)"
        )
        .bind(&result.service_id)
        .bind(result.timestamp.to_rfc3339())
        .bind(result.outcome.as_str())
        .bind(i64::try_from(result.latency_ms).unwrap_or(i64::MAX))
        .bind(&result.detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_probes(&self, service_id: &str, limit: usize) -> SupervisorResult<Vec<ProbeResult>> {
        let rows: Vec<ProbeResultRow> = sqlx::query_as(
            "SELECT service_id, timestamp, outcome, latency_ms, detail FROM probe_results
             WHERE service_id = ? ORDER BY id DESC LIMIT ?"
        )
        .bind(service_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn prune_probes(&self, service_id: &str, keep: usize) -> SupervisorResult<u64> {
        let result = sqlx::query(
            "DELETE FROM probe_results WHERE service_id = ? AND id NOT IN (
                 SELECT id FROM probe_results WHERE service_id = ? ORDER BY id DESC LIMIT ?
             )"
        )
        .bind(service_id)
        .bind(service_id)
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct HealthRecordRow {
    service_id: String,
    consecutive_failures: i64,
    consecutive_successes: i64,
    last_healthy_at: Option<String>,
    last_restart_at: Option<String>,
    restart_count: i64,
    total_restarts: i64,
    degraded_since: Option<String>,
    last_outcome: Option<String>,
    last_detail: Option<String>,
    last_probe_at: Option<String>,
    state: String,
    updated_at: String,
}

fn counter<T: TryFrom<i64>>(value: i64, column: &str) -> SupervisorResult<T> {
    T::try_from(value)
        .map_err(|_| SupervisorError::Storage(format!("Invalid {column}: {value}")))
}

impl TryFrom<HealthRecordRow> for HealthRecord {
    type Error = SupervisorError;

    fn try_from(row: HealthRecordRow) -> Result<Self, Self::Error> {
        let state = ServiceState::from_str(&row.state)
            .ok_or_else(|| SupervisorError::Storage(format!("Invalid state: {}", row.state)))?;

        let last_outcome = row
            .last_outcome
            .map(|s| {
                ProbeOutcome::from_str(&s)
                    .ok_or_else(|| SupervisorError::Storage(format!("Invalid outcome: {s}")))
            })
            .transpose()?;

        Ok(Self {
            service_id: row.service_id,
            consecutive_failures: counter(row.consecutive_failures, "consecutive_failures")?,
            consecutive_successes: counter(row.consecutive_successes, "consecutive_successes")?,
            last_healthy_at: parse_optional_datetime(row.last_healthy_at)?,
            last_restart_at: parse_optional_datetime(row.last_restart_at)?,
            restart_count: counter(row.restart_count, "restart_count")?,
            total_restarts: counter(row.total_restarts, "total_restarts")?,
            degraded_since: parse_optional_datetime(row.degraded_since)?,
            last_outcome,
            last_detail: row.last_detail,
            last_probe_at: parse_optional_datetime(row.last_probe_at)?,
            state,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProbeResultRow {
    service_id: String,
    timestamp: String,
    outcome: String,
    latency_ms: i64,
    detail: String,
}

impl TryFrom<ProbeResultRow> for ProbeResult {
    type Error = SupervisorError;

    fn try_from(row: ProbeResultRow) -> Result<Self, Self::Error> {
        let outcome = ProbeOutcome::from_str(&row.outcome)
            .ok_or_else(|| SupervisorError::Storage(format!("Invalid outcome: {}", row.outcome)))?;

        Ok(Self {
            service_id: row.service_id,
            timestamp: parse_datetime(&row.timestamp)?,
            outcome,
            latency_ms: counter(row.latency_ms, "latency_ms")?,
            detail: row.detail,
        })
    }
}
