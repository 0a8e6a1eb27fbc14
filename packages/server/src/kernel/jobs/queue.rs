//! PostgreSQL-backed durable job queue.
//!
//! The jobs table is the single source of truth for job state. Claiming
//! uses row locks with skip-locked semantics, ownership is enforced by
//! `(id, worker_id)` on every transition, and crashed workers are recovered
//! by a bulk lease-expiry pass rather than per-row inspection.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::dead_letter::DeadLetter;
use super::job::{Job, JobPriority};
use super::schedule::JobSchedule;

// ============================================================================
// Handler errors
// ============================================================================

/// Behavioural classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transient: network timeouts, 5xx, rate limits. Retried with backoff.
    Retryable,
    /// Permanent: validation failures, unknown job type, poison payload.
    /// Goes straight to the dead letter table.
    NonRetryable,
    /// The job's deadline elapsed. Counted as an attempt, then retried.
    Timeout,
    /// The heartbeat discovered the row no longer belongs to this worker.
    /// The worker aborts without touching the row; recovery re-queues it.
    LeaseLost,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Timeout)
    }
}

/// A job failure: one human-readable line plus a retryability tag.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: format!("timeout after {}s", after.as_secs()),
        }
    }

    pub fn lease_lost() -> Self {
        Self {
            kind: ErrorKind::LeaseLost,
            message: "lease lost".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.should_retry()
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        // Unclassified errors default to retryable; handlers tag permanent
        // failures explicitly.
        JobError::retryable(format!("{err:#}"))
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => JobError::permanent(err.to_string()),
            _ => JobError::retryable(err.to_string()),
        }
    }
}

impl From<databox::DataboxError> for JobError {
    fn from(err: databox::DataboxError) -> Self {
        if err.is_retryable() {
            JobError::retryable(err.to_string())
        } else {
            JobError::permanent(err.to_string())
        }
    }
}

// ============================================================================
// Enqueue
// ============================================================================

/// Options for [`JobQueue::enqueue`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct EnqueueOptions {
    #[builder(default)]
    pub priority: JobPriority,
    /// Earliest execution time; `None` means now.
    #[builder(default, setter(strip_option))]
    pub run_at: Option<DateTime<Utc>>,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default = 1_800)]
    pub timeout_seconds: i32,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Result of an enqueue that accounts for idempotency.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// A new row was inserted.
    Created(Uuid),
    /// A live row with the same idempotency key already exists.
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// What `fail` did with the job.
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Re-queued for another attempt at `run_at`.
    Retried { run_at: DateTime<Utc> },
    /// Moved to the dead letter table.
    DeadLettered,
}

/// Report from a lease-recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub requeued: u64,
    pub dead_lettered: u64,
}

// ============================================================================
// Queue trait
// ============================================================================

/// Durable job queue operations.
///
/// All transitions are atomic single-row updates; `complete`/`fail`/
/// `heartbeat` are scoped by `(id, worker_id)` so a worker that lost its
/// lease cannot clobber another worker's run.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult>;

    async fn claim(
        &self,
        worker_id: &str,
        types: &[String],
        lease: Duration,
    ) -> Result<Option<Job>>;

    /// Extend the lease; returns `false` (without error) when the caller no
    /// longer owns the row.
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str, extend: Duration) -> Result<bool>;

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<()>;

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &JobError) -> Result<FailOutcome>;

    /// Bulk pass re-queueing running rows whose lease expired. Rows out of
    /// attempts go to the dead letter table instead.
    async fn recover_expired(&self) -> Result<RecoveryReport>;
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff with cap and uniform jitter:
/// `min(cap, base * 2^retry_count) + U(0, base)`.
///
/// The jitter decorrelates retries from jobs that failed in the same
/// incident.
pub fn backoff_delay(base: Duration, cap: Duration, retry_count: i32) -> Duration {
    let exp = base
        .as_millis()
        .saturating_mul(1u128 << retry_count.clamp(0, 32) as u32);
    let capped = exp.min(cap.as_millis()) as u64;
    let jitter = fastrand::u64(0..=base.as_millis() as u64);
    Duration::from_millis(capped + jitter)
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresJobQueue {
    pool: PgPool,
    retry_base: Duration,
    retry_cap: Duration,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(300),
        }
    }

    pub fn with_retry_policy(pool: PgPool, retry_base: Duration, retry_cap: Duration) -> Self {
        Self {
            pool,
            retry_base,
            retry_cap,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        // Fast path: a live row with this key already exists.
        if let Some(key) = &options.idempotency_key {
            if let Some(existing) =
                Job::find_live_by_idempotency_key(tenant_id, job_type, key, &self.pool).await?
            {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let job = Job::builder()
            .tenant_id(tenant_id)
            .job_type(job_type.to_string())
            .payload(payload)
            .priority(options.priority)
            .max_retries(options.max_retries)
            .timeout_seconds(options.timeout_seconds)
            .run_at(options.run_at.unwrap_or_else(Utc::now))
            .build();

        let job = Job {
            idempotency_key: options.idempotency_key.clone(),
            ..job
        };

        match job.insert(&self.pool).await? {
            Some(inserted) => Ok(EnqueueResult::Created(inserted.id)),
            None => {
                // Lost the insert race on the partial unique index; the
                // winner's row is the canonical one.
                let key = options
                    .idempotency_key
                    .as_deref()
                    .ok_or_else(|| anyhow!("insert returned no row without idempotency key"))?;
                let existing =
                    Job::find_live_by_idempotency_key(tenant_id, job_type, key, &self.pool)
                        .await?
                        .ok_or_else(|| anyhow!("duplicate insert but no live row for key"))?;
                Ok(EnqueueResult::Duplicate(existing.id))
            }
        }
    }

    async fn claim(
        &self,
        worker_id: &str,
        types: &[String],
        lease: Duration,
    ) -> Result<Option<Job>> {
        Job::claim_one(worker_id, types, lease, &self.pool).await
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str, extend: Duration) -> Result<bool> {
        Job::extend_lease(job_id, worker_id, extend, &self.pool).await
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $1,
                completed_at = NOW(),
                lease_until = NULL
            WHERE id = $2 AND worker_id = $3 AND status = 'running'
            "#,
        )
        .bind(result)
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &JobError) -> Result<FailOutcome> {
        let job = Job::find_by_id(job_id, &self.pool)
            .await?
            .ok_or_else(|| anyhow!("job {job_id} not found"))?;

        let attempt_error = serde_json::json!([error.message]);

        if error.is_retryable() && job.retry_count < job.max_retries {
            let delay = backoff_delay(self.retry_base, self.retry_cap, job.retry_count);
            let run_at = Utc::now() + chrono::Duration::from_std(delay)?;

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    run_at = $1,
                    last_error = $2,
                    error_log = error_log || $3::jsonb,
                    lease_until = NULL,
                    worker_id = NULL
                WHERE id = $4 AND worker_id = $5 AND status = 'running'
                "#,
            )
            .bind(run_at)
            .bind(&error.message)
            .bind(&attempt_error)
            .bind(job_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

            return Ok(FailOutcome::Retried { run_at });
        }

        // Terminal: flip to dead and write the dead letter in one
        // transaction so invariant "dead implies dead letter" holds.
        let mut tx = self.pool.begin().await?;

        let dead_job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'dead',
                last_error = $1,
                error_log = error_log || $2::jsonb,
                lease_until = NULL,
                completed_at = NOW()
            WHERE id = $3 AND worker_id = $4 AND status = 'running'
            RETURNING id, tenant_id, job_type, payload, priority, status,
                      retry_count, max_retries, last_error, error_log, idempotency_key,
                      run_at, lease_until, worker_id, timeout_seconds,
                      created_at, started_at, completed_at, result
            "#,
        )
        .bind(&error.message)
        .bind(&attempt_error)
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(dead_job) = dead_job else {
            // Ownership was lost in the meantime; nothing to record.
            tx.rollback().await?;
            return Ok(FailOutcome::DeadLettered);
        };

        DeadLetter::insert_for_job(&dead_job, &mut *tx).await?;

        // Schedule-originated jobs feed the schedule's failure counter.
        if let Some(schedule_id) = dead_job.originating_schedule_id() {
            JobSchedule::increment_fail_count(schedule_id, &mut *tx).await?;
        }

        tx.commit().await?;

        info!(
            job_id = %job_id,
            job_type = %dead_job.job_type,
            attempts = dead_job.retry_count + 1,
            "job dead-lettered"
        );

        Ok(FailOutcome::DeadLettered)
    }

    async fn recover_expired(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        // Pass 1: expired leases with no attempts left become dead letters.
        let mut tx = self.pool.begin().await?;

        let dead: Vec<Job> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'dead',
                last_error = 'lease expired',
                error_log = error_log || '["lease expired"]'::jsonb,
                lease_until = NULL,
                completed_at = NOW()
            WHERE status = 'running'
              AND lease_until < NOW()
              AND retry_count >= max_retries
            RETURNING id, tenant_id, job_type, payload, priority, status,
                      retry_count, max_retries, last_error, error_log, idempotency_key,
                      run_at, lease_until, worker_id, timeout_seconds,
                      created_at, started_at, completed_at, result
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        for job in &dead {
            DeadLetter::insert_for_job(job, &mut *tx).await?;
            if let Some(schedule_id) = job.originating_schedule_id() {
                JobSchedule::increment_fail_count(schedule_id, &mut *tx).await?;
            }
        }
        report.dead_lettered = dead.len() as u64;

        tx.commit().await?;

        // Pass 2: the rest go back to pending immediately, charged one
        // attempt for the crashed run.
        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = retry_count + 1,
                run_at = NOW(),
                last_error = 'lease expired',
                error_log = error_log || '["lease expired"]'::jsonb,
                lease_until = NULL,
                worker_id = NULL
            WHERE status = 'running'
              AND lease_until < NOW()
              AND retry_count < max_retries
            "#,
        )
        .execute(&self.pool)
        .await?;
        report.requeued = requeued.rows_affected();

        if report.requeued > 0 || report.dead_lettered > 0 {
            info!(
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                "recovered jobs with expired leases"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_result_helpers() {
        let created = EnqueueResult::Created(Uuid::new_v4());
        assert!(created.is_created());

        let duplicate = EnqueueResult::Duplicate(Uuid::new_v4());
        assert!(!duplicate.is_created());
        assert_eq!(duplicate.job_id(), duplicate.job_id());
    }

    #[test]
    fn enqueue_options_defaults() {
        let options = EnqueueOptions::default();
        assert_eq!(options.priority, JobPriority::Normal);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.timeout_seconds, 1_800);
        assert!(options.run_at.is_none());
        assert!(options.idempotency_key.is_none());
    }

    #[test]
    fn retryable_and_timeout_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::Timeout.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
        assert!(!ErrorKind::LeaseLost.should_retry());
    }

    #[test]
    fn anyhow_errors_default_to_retryable() {
        let err: JobError = anyhow!("connection reset").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn backoff_grows_exponentially_up_to_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(300);

        // Jitter adds at most `base` on top of the deterministic part.
        for retry in 0..10 {
            let delay = backoff_delay(base, cap, retry);
            let deterministic = (base.as_millis() << retry).min(cap.as_millis()) as u64;
            assert!(delay.as_millis() as u64 >= deterministic);
            assert!(delay.as_millis() as u64 <= deterministic + base.as_millis() as u64);
        }
    }

    #[test]
    fn backoff_first_retry_is_about_base() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(300);
        let delay = backoff_delay(base, cap, 0);
        assert!(delay >= base && delay <= base * 2);
    }

    #[test]
    fn backoff_caps_at_cap_plus_jitter() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(300);
        let delay = backoff_delay(base, cap, 30);
        assert!(delay <= cap + base);
    }
}
