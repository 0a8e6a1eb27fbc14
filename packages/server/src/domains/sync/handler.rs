//! Databox sync handler.
//!
//! For one tenant: pick the accounts that are due, fan out under the
//! process-wide semaphore, pull each account's new entries, ingest them
//! with dedupe, and enqueue an analysis job per genuinely new document.
//! One account failing (bad credentials, portal outage) never aborts its
//! peers; the aggregate job only fails when every account failed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::accounts::DataboxAccount;
use crate::domains::documents::{CreateOutcome, DocumentStore, NewDocument};
use crate::kernel::jobs::{EnqueueOptions, JobContext, JobError, JobEvent};

const DEFAULT_RANGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataboxSyncPayload {
    pub tenant_id: Uuid,
    /// Sync a single account instead of all eligible ones.
    #[serde(default)]
    pub account_id: Option<Uuid>,
    /// Listing window in days; defaults to 30.
    #[serde(default)]
    pub range_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataboxSyncResult {
    pub accounts_synced: u64,
    pub documents_found: u64,
    pub documents_new: u64,
    pub documents_skipped: u64,
    /// Accounts skipped because another sync job already holds them,
    /// with the running job's id.
    pub already_running: Vec<AlreadyRunning>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlreadyRunning {
    pub account_id: Uuid,
    pub running_job_id: Uuid,
}

#[derive(Debug, Default)]
struct AccountOutcome {
    synced: bool,
    found: u64,
    new: u64,
    skipped: u64,
    already_running: Option<AlreadyRunning>,
    errors: Vec<String>,
}

/// Handler for the `databox_sync` job type.
pub async fn run_databox_sync(
    payload: DataboxSyncPayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let started = std::time::Instant::now();
    let now = Utc::now();
    let deps = ctx.deps.clone();

    let accounts = match payload.account_id {
        Some(account_id) => {
            let account =
                DataboxAccount::find_by_id(payload.tenant_id, account_id, &deps.db_pool)
                    .await
                    .map_err(JobError::from)?
                    .ok_or_else(|| {
                        JobError::permanent(format!("databox account {account_id} not found"))
                    })?;
            vec![account]
        }
        None => DataboxAccount::find_sync_due(payload.tenant_id, now, &deps.db_pool)
            .await
            .map_err(JobError::from)?,
    };

    if accounts.is_empty() {
        info!(tenant_id = %payload.tenant_id, "no databox accounts due for sync");
        let result = DataboxSyncResult {
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        return Ok(serde_json::to_value(result).map_err(|e| JobError::permanent(e.to_string()))?);
    }

    let range_days = payload.range_days.unwrap_or(DEFAULT_RANGE_DAYS).max(1);
    let store = Arc::new(DocumentStore::new(
        deps.db_pool.clone(),
        deps.storage.clone(),
        deps.config.analysis_max_doc_size_bytes,
    ));

    let account_count = accounts.len();
    let tasks = accounts.into_iter().map(|account| {
        let ctx = ctx.clone();
        let store = store.clone();
        async move { sync_account(account, range_days, store, &ctx).await }
    });

    let outcomes = join_all(tasks).await;

    let mut result = DataboxSyncResult::default();
    for outcome in outcomes {
        if outcome.synced {
            result.accounts_synced += 1;
        }
        result.documents_found += outcome.found;
        result.documents_new += outcome.new;
        result.documents_skipped += outcome.skipped;
        result.already_running.extend(outcome.already_running);
        result.errors.extend(outcome.errors);
    }
    result.duration_ms = started.elapsed().as_millis() as u64;

    info!(
        tenant_id = %payload.tenant_id,
        accounts_synced = result.accounts_synced,
        documents_found = result.documents_found,
        documents_new = result.documents_new,
        documents_skipped = result.documents_skipped,
        error_count = result.errors.len(),
        "databox sync finished"
    );

    // Only a total wipe-out fails the job; partial failure is data in the
    // result.
    if result.accounts_synced == 0 && result.errors.len() >= account_count {
        return Err(JobError::retryable(format!(
            "all {account_count} accounts failed: {}",
            result.errors.join("; ")
        )));
    }

    serde_json::to_value(result).map_err(|e| JobError::permanent(e.to_string()))
}

async fn sync_account(
    account: DataboxAccount,
    range_days: i64,
    store: Arc<DocumentStore>,
    ctx: &JobContext,
) -> AccountOutcome {
    let deps = &ctx.deps;
    let mut outcome = AccountOutcome::default();

    // Bound tenant fan-out; the permit is held for the whole account.
    let _permit = match deps.sync_limiter.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            outcome.errors.push("sync limiter closed".to_string());
            return outcome;
        }
    };

    // Overlap guard: another running sync job already owns this account.
    match running_sync_for_account(account.tenant_id, account.id, ctx.job_id, &deps.db_pool).await {
        Ok(Some(running_id)) => {
            info!(
                account_id = %account.id,
                running_job_id = %running_id,
                "skipping account: sync already running"
            );
            outcome.already_running = Some(AlreadyRunning {
                account_id: account.id,
                running_job_id: running_id,
            });
            return outcome;
        }
        Ok(None) => {}
        Err(e) => {
            outcome.errors.push(format!("account {}: {e}", account.id));
            return outcome;
        }
    }

    let credentials = match deps
        .credentials
        .credentials_for_account(account.tenant_id, account.id)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            outcome
                .errors
                .push(format!("account {}: credentials: {e}", account.id));
            return outcome;
        }
    };

    let session = match deps.fetcher.open_session(&credentials).await {
        Ok(s) => s,
        Err(e) => {
            warn!(account_id = %account.id, error = %e, "databox session open failed");
            outcome.errors.push(format!("account {}: {e}", account.id));
            return outcome;
        }
    };

    let now = Utc::now();
    let from = now - Duration::days(range_days);
    let entries = match deps.fetcher.list_new_since(&session, from, now).await {
        Ok(entries) => entries,
        Err(e) => {
            outcome.errors.push(format!("account {}: {e}", account.id));
            let _ = deps.fetcher.close_session(&session).await;
            return outcome;
        }
    };

    for entry in entries {
        if ctx.cancellation.is_cancelled() {
            outcome
                .errors
                .push(format!("account {}: cancelled mid-sync", account.id));
            break;
        }

        outcome.found += 1;

        let download = match deps.fetcher.download(&session, &entry.external_id).await {
            Ok(d) => d,
            Err(e) => {
                outcome
                    .errors
                    .push(format!("entry {}: {e}", entry.external_id));
                continue;
            }
        };

        let input = NewDocument {
            account_id: account.id,
            external_id: entry.external_id.clone(),
            doc_type: entry.type_hint.clone(),
            title: entry.title.clone(),
            sender: entry.sender.clone(),
            received_at: entry.received_at,
            content: bytes::Bytes::from(download.bytes),
            content_type: download.content_type,
            metadata: json!({"portal": account.portal}),
        };

        match store.create(account.tenant_id, input).await {
            Ok((document, CreateOutcome::Created)) => {
                outcome.new += 1;
                if let Err(e) = enqueue_analysis(ctx, account.tenant_id, document.id).await {
                    outcome
                        .errors
                        .push(format!("entry {}: enqueue analysis: {e}", entry.external_id));
                }
            }
            Ok((_, CreateOutcome::DuplicateExternalId | CreateOutcome::DuplicateContent)) => {
                outcome.skipped += 1;
            }
            Err(e) => {
                outcome
                    .errors
                    .push(format!("entry {}: {e}", entry.external_id));
            }
        }

        ctx.events.emit(JobEvent::SyncProgress {
            tenant_id: account.tenant_id,
            job_id: ctx.job_id,
            documents_found: outcome.found,
            documents_new: outcome.new,
            documents_skipped: outcome.skipped,
        });
    }

    if let Err(e) = DataboxAccount::mark_synced(account.id, now, &deps.db_pool).await {
        outcome
            .errors
            .push(format!("account {}: mark synced: {e}", account.id));
    } else {
        outcome.synced = true;
    }

    let _ = deps.fetcher.close_session(&session).await;

    outcome
}

async fn enqueue_analysis(
    ctx: &JobContext,
    tenant_id: Uuid,
    document_id: Uuid,
) -> anyhow::Result<()> {
    let options = EnqueueOptions::builder()
        .idempotency_key(format!("analysis:{document_id}"))
        .build();

    ctx.deps
        .job_queue
        .enqueue(
            tenant_id,
            "document_analysis",
            json!({"tenant_id": tenant_id, "document_id": document_id}),
            options,
        )
        .await?;

    Ok(())
}

/// Store-level overlap check: is another `databox_sync` job currently
/// running for this account?
async fn running_sync_for_account(
    tenant_id: Uuid,
    account_id: Uuid,
    current_job_id: Uuid,
    pool: &sqlx::PgPool,
) -> anyhow::Result<Option<Uuid>> {
    let running: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM jobs
        WHERE tenant_id = $1
          AND job_type = 'databox_sync'
          AND status = 'running'
          AND payload->>'account_id' = $2
          AND id <> $3
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(account_id.to_string())
    .bind(current_job_id)
    .fetch_optional(pool)
    .await?;

    Ok(running)
}
