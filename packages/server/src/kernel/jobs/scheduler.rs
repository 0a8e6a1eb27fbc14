//! Scheduler that materialises due schedules into jobs.
//!
//! Runs on a fixed tick. Every tick reads the due schedules, enqueues one
//! job per schedule with an idempotency key derived from the planned
//! minute, and advances `next_run_at`. Several scheduler processes can run
//! at once; the store's idempotency contract guarantees one job per
//! planned tick regardless of who gets there first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::queue::{EnqueueOptions, JobQueue};
use super::schedule::JobSchedule;

/// Idempotency key for one planned firing of one schedule.
///
/// The bucket is the integer minute of the planned instant, so a scheduler
/// restart or sub-minute clock skew cannot materialise the same tick twice.
pub fn schedule_idempotency_key(schedule_id: uuid::Uuid, planned: DateTime<Utc>) -> String {
    format!("schedule:{}:{}", schedule_id, planned.timestamp() / 60)
}

pub struct Scheduler {
    pool: PgPool,
    queue: Arc<dyn JobQueue>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(pool: PgPool, queue: Arc<dyn JobQueue>, tick: Duration) -> Self {
        Self { pool, queue, tick }
    }

    /// Run ticks until shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(tick_secs = self.tick.as_secs(), "scheduler starting");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// One tick: materialise every due schedule.
    ///
    /// A schedule whose cron expression or timezone no longer parses is
    /// logged and skipped; it stays due and an operator fixes it, rather
    /// than the whole tick failing.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = JobSchedule::find_due(now, &self.pool).await?;
        let mut materialised = 0;

        for schedule in due {
            match self.materialise(&schedule, now).await {
                Ok(created) => {
                    if created {
                        materialised += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        schedule_id = %schedule.id,
                        schedule_name = %schedule.name,
                        error = %e,
                        "failed to materialise schedule"
                    );
                }
            }
        }

        Ok(materialised)
    }

    async fn materialise(&self, schedule: &JobSchedule, now: DateTime<Utc>) -> Result<bool> {
        // The planned instant is the tick this firing stands for; for a
        // never-run schedule that is simply now.
        let planned = schedule.next_run_at.unwrap_or(now);

        let mut payload = schedule.job_payload.clone();
        if !payload.is_object() {
            payload = serde_json::json!({});
        }
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "tenant_id".to_string(),
                serde_json::Value::String(schedule.tenant_id.to_string()),
            );
            map.insert(
                "schedule_id".to_string(),
                serde_json::Value::String(schedule.id.to_string()),
            );
        }

        let options = EnqueueOptions::builder()
            .idempotency_key(schedule_idempotency_key(schedule.id, planned))
            .build();

        let result = self
            .queue
            .enqueue(schedule.tenant_id, &schedule.job_type, payload, options)
            .await?;

        let next_run_at = schedule.compute_next_run(now)?;

        if result.is_created() {
            JobSchedule::advance_after_enqueue(schedule.id, now, next_run_at, &self.pool).await?;
            info!(
                schedule_id = %schedule.id,
                schedule_name = %schedule.name,
                job_id = %result.job_id(),
                next_run_at = ?next_run_at,
                "schedule materialised"
            );
            Ok(true)
        } else {
            // Another scheduler process won this tick. Converge on the
            // same next_run_at without counting a second run.
            JobSchedule::advance_only(schedule.id, next_run_at, &self.pool).await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn idempotency_key_buckets_by_minute() {
        let id = Uuid::new_v4();
        let planned = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
        let skewed = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 42).unwrap();

        assert_eq!(
            schedule_idempotency_key(id, planned),
            schedule_idempotency_key(id, skewed)
        );
    }

    #[test]
    fn idempotency_key_differs_across_minutes() {
        let id = Uuid::new_v4();
        let first = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert_ne!(
            schedule_idempotency_key(id, first),
            schedule_idempotency_key(id, second)
        );
    }

    #[test]
    fn idempotency_key_differs_across_schedules() {
        let planned = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
        assert_ne!(
            schedule_idempotency_key(Uuid::new_v4(), planned),
            schedule_idempotency_key(Uuid::new_v4(), planned)
        );
    }
}
