//! Dead-letter records for terminally failed jobs.
//!
//! A dead letter keeps the full payload and every attempt's error message
//! so an operator can inspect, fix the cause and re-enqueue by hand.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::job::Job;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub original_job_id: Uuid,
    pub tenant_id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Ordered attempt error messages, oldest first.
    pub errors: serde_json::Value,
    pub first_attempted_at: Option<DateTime<Utc>>,
    pub last_attempted_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Insert a dead letter for a job whose error_log already contains the
    /// final attempt. Runs inside the caller's transaction so the job's
    /// `dead` transition and the dead letter appear together.
    pub async fn insert_for_job<'e, E>(job: &Job, executor: E) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO job_dead_letters (
                id, original_job_id, tenant_id, job_type, payload, errors,
                first_attempted_at, last_attempted_at, acknowledged, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), FALSE, NOW())
            RETURNING id, original_job_id, tenant_id, job_type, payload, errors,
                      first_attempted_at, last_attempted_at, acknowledged, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(&job.error_log)
        .bind(job.started_at)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }

    pub async fn find_by_original_job_id(
        original_job_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, original_job_id, tenant_id, job_type, payload, errors,
                   first_attempted_at, last_attempted_at, acknowledged, created_at
            FROM job_dead_letters
            WHERE original_job_id = $1
            "#,
        )
        .bind(original_job_id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_unacknowledged(tenant_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, original_job_id, tenant_id, job_type, payload, errors,
                   first_attempted_at, last_attempted_at, acknowledged, created_at
            FROM job_dead_letters
            WHERE tenant_id = $1 AND acknowledged = FALSE
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn acknowledge(id: Uuid, tenant_id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_dead_letters SET acknowledged = TRUE WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The attempt errors as strings, oldest first.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_preserve_order() {
        let letter = DeadLetter {
            id: Uuid::new_v4(),
            original_job_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            job_type: "databox_sync".to_string(),
            payload: serde_json::Value::Null,
            errors: serde_json::json!(["e1", "e2", "e3"]),
            first_attempted_at: None,
            last_attempted_at: Utc::now(),
            acknowledged: false,
            created_at: Utc::now(),
        };

        assert_eq!(letter.error_messages(), vec!["e1", "e2", "e3"]);
    }
}
