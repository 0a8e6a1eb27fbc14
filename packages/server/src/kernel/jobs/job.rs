//! Job model for background work execution.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    /// Operator-cancelled work; never produced by the retry machinery.
    Failed,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Claim ordering (lower = claimed earlier). Matches the declaration
    /// order of the `job_priority` Postgres enum.
    pub fn rank(&self) -> i16 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

// ============================================================================
// Job model
// ============================================================================

const JOB_COLUMNS: &str = r#"
    id, tenant_id, job_type, payload, priority, status,
    retry_count, max_retries, last_error, error_log, idempotency_key,
    run_at, lease_until, worker_id, timeout_seconds,
    created_at, started_at, completed_at, result
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub job_type: String,
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,
    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,
    /// One entry per failed attempt, oldest first. Copied into the
    /// dead-letter row when the job goes terminal.
    #[builder(default = serde_json::json!([]))]
    pub error_log: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
    #[builder(default = Utc::now())]
    pub run_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub lease_until: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,
    #[builder(default = 1_800)]
    pub timeout_seconds: i32,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Find a live (pending or running) job with this idempotency key.
    pub async fn find_live_by_idempotency_key(
        tenant_id: Uuid,
        job_type: &str,
        key: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE tenant_id = $1 AND job_type = $2 AND idempotency_key = $3
              AND status IN ('pending', 'running')
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .bind(job_type)
        .bind(key)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Insert a new pending row. The partial unique index on
    /// `(tenant_id, job_type, idempotency_key)` makes concurrent inserts of
    /// the same key collapse into one row; `None` is returned when this
    /// insert lost that race.
    pub async fn insert(&self, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, tenant_id, job_type, payload, priority, status,
                retry_count, max_retries, last_error, error_log, idempotency_key,
                run_at, lease_until, worker_id, timeout_seconds,
                created_at, started_at, completed_at, result
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14, $15,
                $16, $17, $18, $19
            )
            ON CONFLICT (tenant_id, job_type, idempotency_key)
                WHERE status IN ('pending', 'running')
                DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.tenant_id)
        .bind(&self.job_type)
        .bind(&self.payload)
        .bind(self.priority)
        .bind(self.status)
        .bind(self.retry_count)
        .bind(self.max_retries)
        .bind(&self.last_error)
        .bind(&self.error_log)
        .bind(&self.idempotency_key)
        .bind(self.run_at)
        .bind(self.lease_until)
        .bind(&self.worker_id)
        .bind(self.timeout_seconds)
        .bind(self.created_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .bind(&self.result)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Atomically claim the single best pending job among `types`.
    ///
    /// "Best" is highest priority, then earliest `run_at`. Uses
    /// `FOR UPDATE SKIP LOCKED` so concurrent claimers never receive the
    /// same row.
    pub async fn claim_one(
        worker_id: &str,
        types: &[String],
        lease: std::time::Duration,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND run_at <= NOW()
                  AND job_type = ANY($1)
                ORDER BY priority, run_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                worker_id = $2,
                lease_until = NOW() + ($3 || ' milliseconds')::INTERVAL,
                started_at = COALESCE(started_at, NOW())
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(types)
        .bind(worker_id)
        .bind((lease.as_millis() as i64).to_string())
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Extend the lease for a running job (heartbeat).
    ///
    /// Returns `false` when the row no longer belongs to this worker, in
    /// which case the caller must abort the job.
    pub async fn extend_lease(
        job_id: Uuid,
        worker_id: &str,
        lease: std::time::Duration,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_until = NOW() + ($1 || ' milliseconds')::INTERVAL
            WHERE id = $2 AND worker_id = $3 AND status = 'running'
            "#,
        )
        .bind((lease.as_millis() as i64).to_string())
        .bind(job_id)
        .bind(worker_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether this job originated from a schedule (the scheduler stamps
    /// the template payload with the schedule id).
    pub fn originating_schedule_id(&self) -> Option<Uuid> {
        self.payload
            .get("schedule_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .tenant_id(Uuid::new_v4())
            .job_type("databox_sync")
            .build()
    }

    #[test]
    fn new_job_starts_pending_with_defaults() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, JobPriority::Normal);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.timeout_seconds, 1_800);
        assert!(job.lease_until.is_none());
        assert!(job.worker_id.is_none());
    }

    #[test]
    fn priority_rank_orders_claims() {
        assert!(JobPriority::Critical.rank() < JobPriority::High.rank());
        assert!(JobPriority::High.rank() < JobPriority::Normal.rank());
        assert!(JobPriority::Normal.rank() < JobPriority::Low.rank());
    }

    #[test]
    fn schedule_id_read_from_payload() {
        let schedule_id = Uuid::new_v4();
        let mut job = sample_job();
        job.payload = serde_json::json!({"schedule_id": schedule_id.to_string()});
        assert_eq!(job.originating_schedule_id(), Some(schedule_id));
    }

    #[test]
    fn schedule_id_absent_for_plain_payload() {
        let mut job = sample_job();
        job.payload = serde_json::json!({"tenant_id": "x"});
        assert_eq!(job.originating_schedule_id(), None);
    }
}
