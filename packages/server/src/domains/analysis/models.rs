//! Persisted analysis entities.
//!
//! One `Analysis` row per pipeline run, plus the extracted entities it
//! produced. Entities are inserted individually; a partially populated
//! analysis is valid and still completes.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::types::{
    ActionDraft, ActionPriority, AmountDraft, AmountKind, DeadlineDraft, DeadlineKind,
    SuggestionDraft,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "analysis_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "action_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
}

// ============================================================================
// Analysis
// ============================================================================

const ANALYSIS_COLUMNS: &str = r#"
    id, document_id, tenant_id, status, is_scanned, ocr_confidence,
    document_type, classification_confidence, summary, key_points,
    text_length, page_count, tokens_used, processing_time_ms,
    error_code, error_message, completed_at, created_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub status: AnalysisStatus,
    pub is_scanned: bool,
    pub ocr_confidence: Option<f32>,
    pub document_type: Option<String>,
    pub classification_confidence: Option<f32>,
    pub summary: Option<String>,
    pub key_points: serde_json::Value,
    pub text_length: i32,
    pub page_count: i32,
    pub tokens_used: Option<i32>,
    pub processing_time_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    /// Insert a fresh row in `processing` state for one pipeline run.
    ///
    /// A previous run of this document that died mid-processing (crashed
    /// worker, retried job) is closed out first so it cannot linger as
    /// `processing` forever.
    pub async fn start(tenant_id: Uuid, document_id: Uuid, pool: &PgPool) -> Result<Self> {
        sqlx::query(
            r#"
            UPDATE document_analyses
            SET status = 'failed',
                error_code = 'superseded',
                error_message = 'superseded by a newer analysis run',
                completed_at = NOW()
            WHERE document_id = $1 AND tenant_id = $2 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(document_id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO document_analyses (
                id, document_id, tenant_id, status, is_scanned, key_points,
                text_length, page_count, created_at
            )
            VALUES ($1, $2, $3, 'processing', FALSE, '[]'::jsonb, 0, 0, NOW())
            RETURNING {ANALYSIS_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_by_id(tenant_id: Uuid, id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM document_analyses WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_latest_for_document(
        tenant_id: Uuid,
        document_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {ANALYSIS_COLUMNS} FROM document_analyses
            WHERE document_id = $1 AND tenant_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(document_id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Finalise a successful run.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        id: Uuid,
        is_scanned: bool,
        ocr_confidence: Option<f32>,
        document_type: Option<&str>,
        classification_confidence: Option<f32>,
        summary: Option<&str>,
        key_points: &serde_json::Value,
        text_length: i32,
        page_count: i32,
        tokens_used: Option<i32>,
        processing_time_ms: i64,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE document_analyses
            SET status = 'completed',
                is_scanned = $1,
                ocr_confidence = $2,
                document_type = $3,
                classification_confidence = $4,
                summary = $5,
                key_points = $6,
                text_length = $7,
                page_count = $8,
                tokens_used = $9,
                processing_time_ms = $10,
                completed_at = NOW()
            WHERE id = $11
            "#,
        )
        .bind(is_scanned)
        .bind(ocr_confidence)
        .bind(document_type)
        .bind(classification_confidence)
        .bind(summary)
        .bind(key_points)
        .bind(text_length)
        .bind(page_count)
        .bind(tokens_used)
        .bind(processing_time_ms)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Finalise a failed run with its machine-readable error tag.
    pub async fn fail(
        id: Uuid,
        error_code: &str,
        error_message: &str,
        processing_time_ms: i64,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE document_analyses
            SET status = 'failed',
                error_code = $1,
                error_message = $2,
                processing_time_ms = $3,
                completed_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(error_code)
        .bind(error_message)
        .bind(processing_time_ms)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Extracted deadlines
// ============================================================================

const DEADLINE_COLUMNS: &str = r#"
    id, analysis_id, document_id, tenant_id, kind, due_date, description,
    confidence, is_hard, is_acknowledged, acknowledged_at, manually_set,
    corrected_by_user, notes, created_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDeadline {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub kind: DeadlineKind,
    pub due_date: NaiveDate,
    pub description: String,
    pub confidence: f32,
    pub is_hard: bool,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub manually_set: bool,
    pub corrected_by_user: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExtractedDeadline {
    pub async fn insert_draft(
        tenant_id: Uuid,
        analysis_id: Uuid,
        document_id: Uuid,
        draft: &DeadlineDraft,
        pool: &PgPool,
    ) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO extracted_deadlines (
                id, analysis_id, document_id, tenant_id, kind, due_date,
                description, confidence, is_hard, is_acknowledged,
                manually_set, corrected_by_user, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, FALSE, FALSE, NOW())
            RETURNING {DEADLINE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(analysis_id)
        .bind(document_id)
        .bind(tenant_id)
        .bind(draft.kind)
        .bind(draft.date)
        .bind(&draft.description)
        .bind(draft.confidence)
        .bind(draft.is_hard)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_for_document(
        tenant_id: Uuid,
        document_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {DEADLINE_COLUMNS} FROM extracted_deadlines
            WHERE document_id = $1 AND tenant_id = $2
            ORDER BY due_date
            "#
        ))
        .bind(document_id)
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Unacknowledged deadlines due exactly on `target`.
    pub async fn find_due_on(
        tenant_id: Uuid,
        target: NaiveDate,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {DEADLINE_COLUMNS} FROM extracted_deadlines
            WHERE tenant_id = $1 AND due_date = $2 AND is_acknowledged = FALSE
            ORDER BY due_date, created_at
            "#
        ))
        .bind(tenant_id)
        .bind(target)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Unacknowledged deadlines already in the past.
    pub async fn find_overdue(
        tenant_id: Uuid,
        today: NaiveDate,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {DEADLINE_COLUMNS} FROM extracted_deadlines
            WHERE tenant_id = $1 AND due_date < $2 AND is_acknowledged = FALSE
            ORDER BY due_date
            "#
        ))
        .bind(tenant_id)
        .bind(today)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn acknowledge(tenant_id: Uuid, id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE extracted_deadlines
            SET is_acknowledged = TRUE, acknowledged_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND is_acknowledged = FALSE
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Extracted amounts
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedAmount {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub kind: AmountKind,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl ExtractedAmount {
    pub async fn insert_draft(
        tenant_id: Uuid,
        analysis_id: Uuid,
        document_id: Uuid,
        draft: &AmountDraft,
        pool: &PgPool,
    ) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO extracted_amounts (
                id, analysis_id, document_id, tenant_id, kind, amount_cents,
                currency, description, confidence, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING id, analysis_id, document_id, tenant_id, kind, amount_cents,
                      currency, description, confidence, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(analysis_id)
        .bind(document_id)
        .bind(tenant_id)
        .bind(draft.kind)
        .bind(draft.amount_cents)
        .bind(&draft.currency)
        .bind(&draft.description)
        .bind(draft.confidence)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_for_document(
        tenant_id: Uuid,
        document_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, analysis_id, document_id, tenant_id, kind, amount_cents,
                   currency, description, confidence, created_at
            FROM extracted_amounts
            WHERE document_id = $1 AND tenant_id = $2
            ORDER BY amount_cents DESC
            "#,
        )
        .bind(document_id)
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

// ============================================================================
// Action items
// ============================================================================

const ACTION_COLUMNS: &str = r#"
    id, document_id, tenant_id, title, description, priority, category,
    status, due_date, assigned_to, confidence, source_text, created_at, updated_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: ActionPriority,
    pub category: String,
    pub status: ActionStatus,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<String>,
    pub confidence: f32,
    pub source_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionItem {
    pub async fn insert_draft(
        tenant_id: Uuid,
        document_id: Uuid,
        draft: &ActionDraft,
        pool: &PgPool,
    ) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO action_items (
                id, document_id, tenant_id, title, description, priority,
                category, status, due_date, confidence, source_text,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, NOW(), NOW())
            RETURNING {ACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(tenant_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.priority)
        .bind(&draft.category)
        .bind(draft.due_date)
        .bind(draft.confidence)
        .bind(&draft.source_text)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_open_for_document(
        tenant_id: Uuid,
        document_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {ACTION_COLUMNS} FROM action_items
            WHERE document_id = $1 AND tenant_id = $2 AND status = 'pending'
            ORDER BY priority DESC, due_date ASC NULLS LAST
            "#
        ))
        .bind(document_id)
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn set_status(
        tenant_id: Uuid,
        id: Uuid,
        status: ActionStatus,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE action_items SET status = $1, updated_at = NOW() WHERE id = $2 AND tenant_id = $3",
        )
        .bind(status)
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Response suggestions
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSuggestion {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub body: String,
    pub tone: String,
    pub created_at: DateTime<Utc>,
}

impl ResponseSuggestion {
    pub async fn insert_draft(
        tenant_id: Uuid,
        analysis_id: Uuid,
        document_id: Uuid,
        draft: &SuggestionDraft,
        pool: &PgPool,
    ) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO response_suggestions (
                id, analysis_id, document_id, tenant_id, title, body, tone, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, analysis_id, document_id, tenant_id, title, body, tone, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(analysis_id)
        .bind(document_id)
        .bind(tenant_id)
        .bind(&draft.title)
        .bind(&draft.body)
        .bind(&draft.tone)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }
}
