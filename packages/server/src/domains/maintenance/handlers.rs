//! Housekeeping job handlers: webhook delivery, watchlist checks, audit
//! archival and session cleanup.
//!
//! Cleanup and archival run tenant-scoped by default; operators can widen
//! a run to every tenant via the payload (`all_tenants: true`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::domains::documents::Document;
use crate::kernel::jobs::{JobContext, JobError};

// ============================================================================
// webhook_delivery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryPayload {
    pub tenant_id: Uuid,
    pub url: String,
    pub body: serde_json::Value,
}

/// Deliver one payload to a tenant-configured webhook. Transport failures
/// are retryable; the queue's backoff does the pacing.
pub async fn run_webhook_delivery(
    payload: WebhookDeliveryPayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let status = ctx
        .deps
        .notifier
        .send_webhook(&payload.url, &payload.body)
        .await
        .map_err(|e| JobError::retryable(e.to_string()))?;

    if !status.is_success() {
        return Err(JobError::retryable(format!(
            "webhook endpoint rejected delivery: {status:?}"
        )));
    }

    Ok(json!({"delivered": true, "url": payload.url}))
}

// ============================================================================
// watchlist_check
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistCheckPayload {
    pub tenant_id: Uuid,
    /// Look-back window for new registry documents.
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
}

fn default_window_hours() -> i64 {
    24
}

/// Check for fresh company-registry documents and notify the tenant.
pub async fn run_watchlist_check(
    payload: WatchlistCheckPayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let pool = &ctx.deps.db_pool;
    let since = Utc::now() - chrono::Duration::hours(payload.window_hours.max(1));

    let fresh: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT id, external_id FROM documents
        WHERE tenant_id = $1
          AND metadata->>'portal' = 'firmenbuch'
          AND created_at >= $2
        ORDER BY created_at
        "#,
    )
    .bind(payload.tenant_id)
    .bind(since)
    .fetch_all(pool)
    .await
    .map_err(JobError::from)?;

    if !fresh.is_empty() {
        let recipient = format!("tenant:{}", payload.tenant_id);
        let body = json!({
            "documents": fresh.iter().map(|(id, ext)| json!({"id": id, "external_id": ext})).collect::<Vec<_>>(),
        })
        .to_string();

        let _ = ctx
            .deps
            .notifier
            .send_deadline_reminder(
                &recipient,
                &format!("{} neue Firmenbuch-Dokumente", fresh.len()),
                &body,
            )
            .await;
    }

    Ok(json!({"matches": fresh.len()}))
}

// ============================================================================
// audit_archive
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditArchivePayload {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub all_tenants: bool,
    /// Terminal jobs older than this many days are pruned.
    #[serde(default = "default_retention_days")]
    pub job_retention_days: i64,
}

fn default_retention_days() -> i64 {
    90
}

/// Archive documents past their retention date and prune old terminal job
/// rows (their dead letters remain as the audit trail).
pub async fn run_audit_archive(
    payload: AuditArchivePayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let pool = &ctx.deps.db_pool;
    let today = Utc::now().date_naive();
    let cutoff = Utc::now() - chrono::Duration::days(payload.job_retention_days.max(1));

    let tenant_filter = match (payload.all_tenants, payload.tenant_id) {
        (true, _) => None,
        (false, Some(tenant_id)) => Some(tenant_id),
        (false, None) => Some(ctx.tenant_id),
    };

    let mut documents_archived = 0u64;
    let mut blobs_deleted = 0u64;

    if let Some(tenant_id) = tenant_filter {
        let paths = Document::archive_past_retention(tenant_id, today, pool)
            .await
            .map_err(JobError::from)?;
        documents_archived = paths.len() as u64;
        for path in paths {
            if ctx.deps.storage.delete(&path).await.is_ok() {
                blobs_deleted += 1;
            }
        }
    } else {
        let tenants: Vec<Uuid> =
            sqlx::query_scalar("SELECT DISTINCT tenant_id FROM documents WHERE retention_until < $1")
                .bind(today)
                .fetch_all(pool)
                .await
                .map_err(JobError::from)?;
        for tenant_id in tenants {
            let paths = Document::archive_past_retention(tenant_id, today, pool)
                .await
                .map_err(JobError::from)?;
            documents_archived += paths.len() as u64;
            for path in paths {
                if ctx.deps.storage.delete(&path).await.is_ok() {
                    blobs_deleted += 1;
                }
            }
        }
    }

    let jobs_pruned = match tenant_filter {
        Some(tenant_id) => sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE tenant_id = $1
              AND status IN ('completed', 'dead')
              AND created_at < $2
            "#,
        )
        .bind(tenant_id)
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(JobError::from)?
        .rows_affected(),
        None => sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'dead') AND created_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(JobError::from)?
        .rows_affected(),
    };

    info!(
        documents_archived,
        blobs_deleted, jobs_pruned, "audit archive run finished"
    );

    Ok(json!({
        "documents_archived": documents_archived,
        "blobs_deleted": blobs_deleted,
        "jobs_pruned": jobs_pruned,
    }))
}

// ============================================================================
// session_cleanup
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCleanupPayload {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub all_tenants: bool,
}

/// Reclaim expired job leases and refresh account sync bookkeeping. The
/// lease pass is global by nature (leases are process-scoped, not
/// tenant-scoped); the payload scope only bounds the account sweep.
pub async fn run_session_cleanup(
    payload: SessionCleanupPayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let report = ctx
        .deps
        .job_queue
        .recover_expired()
        .await
        .map_err(JobError::from)?;

    let tenant_filter = match (payload.all_tenants, payload.tenant_id) {
        (true, _) => None,
        (false, Some(tenant_id)) => Some(tenant_id),
        (false, None) => Some(ctx.tenant_id),
    };

    // Accounts stuck mid-sync for a day get their window reopened.
    let stale_cutoff = Utc::now() - chrono::Duration::hours(24);
    let accounts_reset = match tenant_filter {
        Some(tenant_id) => sqlx::query(
            r#"
            UPDATE databox_accounts
            SET updated_at = NOW()
            WHERE tenant_id = $1 AND last_sync_at < $2
            "#,
        )
        .bind(tenant_id)
        .bind(stale_cutoff)
        .execute(&ctx.deps.db_pool)
        .await
        .map_err(JobError::from)?
        .rows_affected(),
        None => sqlx::query("UPDATE databox_accounts SET updated_at = NOW() WHERE last_sync_at < $1")
            .bind(stale_cutoff)
            .execute(&ctx.deps.db_pool)
            .await
            .map_err(JobError::from)?
            .rows_affected(),
    };

    Ok(json!({
        "leases_requeued": report.requeued,
        "leases_dead_lettered": report.dead_lettered,
        "accounts_touched": accounts_reset,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_payload_defaults_to_tenant_scope() {
        let raw = json!({});
        let payload: AuditArchivePayload = serde_json::from_value(raw).unwrap();
        assert!(!payload.all_tenants);
        assert!(payload.tenant_id.is_none());
        assert_eq!(payload.job_retention_days, 90);
    }

    #[test]
    fn cleanup_payload_operator_override() {
        let raw = json!({"all_tenants": true});
        let payload: SessionCleanupPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.all_tenants);
    }
}
