//! Handler for the `document_analysis` job type.
//!
//! Loads the document, runs the pipeline, persists the outcome. Entities
//! are persisted one by one; a failed insert degrades that entity rather
//! than rolling back the run, so a partially populated analysis still
//! completes.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::documents::Document;
use crate::kernel::jobs::{JobContext, JobError};
use crate::kernel::storage::StorageError;

use super::models::{Analysis, ActionItem, ExtractedAmount, ExtractedDeadline, ResponseSuggestion};
use super::pipeline::{PipelineConfig, run_pipeline};
use super::types::{AnalysisOutcome, error_codes};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub tenant_id: Uuid,
    pub document_id: Uuid,
}

pub async fn run_document_analysis(
    payload: AnalysisPayload,
    ctx: JobContext,
) -> Result<serde_json::Value, JobError> {
    let deps = &ctx.deps;
    let pool = &deps.db_pool;

    let document = Document::find_by_id(payload.tenant_id, payload.document_id, pool)
        .await
        .map_err(JobError::from)?;

    let Some(document) = document else {
        // A stale analysis row for this id (from a prior partial run) is
        // closed out before the job dead-letters.
        if let Ok(Some(analysis)) =
            Analysis::find_latest_for_document(payload.tenant_id, payload.document_id, pool).await
        {
            let _ = Analysis::fail(
                analysis.id,
                error_codes::DOCUMENT_NOT_FOUND,
                "document metadata lookup was empty",
                0,
                pool,
            )
            .await;
        }
        return Err(JobError::permanent(format!(
            "document {} not found for tenant {}",
            payload.document_id, payload.tenant_id
        )));
    };

    let analysis = Analysis::start(payload.tenant_id, document.id, pool)
        .await
        .map_err(JobError::from)?;

    let content = match deps.storage.get(&document.storage_path).await {
        Ok(content) => content,
        Err(StorageError::NotFound { path }) => {
            let message = format!("stored blob missing: {path}");
            let _ = Analysis::fail(analysis.id, "storage_error", &message, 0, pool).await;
            return Err(JobError::permanent(message));
        }
        Err(e) => return Err(JobError::retryable(e.to_string())),
    };

    let config = PipelineConfig::from_app_config(&deps.config);
    let outcome = run_pipeline(
        &content.bytes,
        &document.mime_type,
        deps.llm.as_ref(),
        deps.ocr.as_deref(),
        &config,
    )
    .await;

    persist_outcome(&ctx, &document, &analysis, &outcome).await?;

    info!(
        tenant_id = %payload.tenant_id,
        document_id = %document.id,
        analysis_id = %analysis.id,
        failed = outcome.is_failed(),
        deadlines = outcome.deadlines.len(),
        amounts = outcome.amounts.len(),
        actions = outcome.actions.len(),
        warnings = outcome.warnings.len(),
        "document analysis finished"
    );

    Ok(json!({
        "analysis_id": analysis.id,
        "status": if outcome.is_failed() { "failed" } else { "completed" },
        "error_code": outcome.failure.as_ref().map(|(code, _)| code.clone()),
        "deadlines": outcome.deadlines.len(),
        "amounts": outcome.amounts.len(),
        "action_items": outcome.actions.len(),
        "suggestions": outcome.suggestions.len(),
        "warnings": outcome.warnings,
        "tokens_used": outcome.tokens_used,
        "processing_time_ms": outcome.processing_time_ms,
    }))
}

async fn persist_outcome(
    ctx: &JobContext,
    document: &Document,
    analysis: &Analysis,
    outcome: &AnalysisOutcome,
) -> Result<(), JobError> {
    let pool = &ctx.deps.db_pool;

    if let Some((code, message)) = &outcome.failure {
        Analysis::fail(analysis.id, code, message, outcome.processing_time_ms, pool)
            .await
            .map_err(JobError::from)?;
        return Ok(());
    }

    for draft in &outcome.deadlines {
        if let Err(e) =
            ExtractedDeadline::insert_draft(document.tenant_id, analysis.id, document.id, draft, pool)
                .await
        {
            warn!(analysis_id = %analysis.id, error = %e, "failed to persist deadline");
        }
    }

    for draft in &outcome.amounts {
        if let Err(e) =
            ExtractedAmount::insert_draft(document.tenant_id, analysis.id, document.id, draft, pool)
                .await
        {
            warn!(analysis_id = %analysis.id, error = %e, "failed to persist amount");
        }
    }

    for draft in &outcome.actions {
        if let Err(e) =
            ActionItem::insert_draft(document.tenant_id, document.id, draft, pool).await
        {
            warn!(analysis_id = %analysis.id, error = %e, "failed to persist action item");
        }
    }

    for draft in &outcome.suggestions {
        if let Err(e) = ResponseSuggestion::insert_draft(
            document.tenant_id,
            analysis.id,
            document.id,
            draft,
            pool,
        )
        .await
        {
            warn!(analysis_id = %analysis.id, error = %e, "failed to persist suggestion");
        }
    }

    // The earliest hard deadline feeds the document-level reminder loop.
    let earliest = outcome
        .deadlines
        .iter()
        .filter(|d| d.is_hard)
        .map(|d| d.date)
        .min();
    if let Some(date) = earliest {
        if document.deadline.is_none() {
            if let Err(e) =
                Document::set_deadline(document.tenant_id, document.id, date, pool).await
            {
                warn!(document_id = %document.id, error = %e, "failed to set document deadline");
            }
        }
    }

    let classification = outcome.classification.as_ref();
    let key_points = outcome
        .summary
        .as_ref()
        .map(|s| serde_json::to_value(&s.key_points).unwrap_or_else(|_| json!([])))
        .unwrap_or_else(|| json!([]));

    Analysis::complete(
        analysis.id,
        outcome.is_scanned,
        outcome.ocr_confidence,
        classification.map(|c| c.doc_type.as_str()),
        classification.map(|c| c.confidence),
        outcome.summary.as_ref().map(|s| s.summary.as_str()),
        &key_points,
        outcome.text_length,
        outcome.page_count,
        outcome.tokens_used,
        outcome.processing_time_ms,
        pool,
    )
    .await
    .map_err(JobError::from)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decodes_from_sync_enqueue_shape() {
        let tenant_id = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        let raw = json!({"tenant_id": tenant_id, "document_id": document_id});

        let payload: AnalysisPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(payload.tenant_id, tenant_id);
        assert_eq!(payload.document_id, document_id);
    }
}
