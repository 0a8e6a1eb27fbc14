//! Document model: one stored portal artifact per row.
//!
//! Every read and write is scoped by `tenant_id`. A lookup for another
//! tenant's document behaves exactly like a lookup for a missing one.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "document_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    New,
    Read,
    Archived,
}

/// Reminder offsets with a dedicated sent-marker column.
///
/// The column names are fixed here; offsets without a column (e.g. a
/// same-day reminder) are not emitted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOffset {
    SevenDays,
    ThreeDays,
    OneDay,
}

impl ReminderOffset {
    pub fn from_days(days: i64) -> Option<Self> {
        match days {
            7 => Some(ReminderOffset::SevenDays),
            3 => Some(ReminderOffset::ThreeDays),
            1 => Some(ReminderOffset::OneDay),
            _ => None,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            ReminderOffset::SevenDays => 7,
            ReminderOffset::ThreeDays => 3,
            ReminderOffset::OneDay => 1,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            ReminderOffset::SevenDays => "reminder_7d_sent_at",
            ReminderOffset::ThreeDays => "reminder_3d_sent_at",
            ReminderOffset::OneDay => "reminder_1d_sent_at",
        }
    }
}

const DOCUMENT_COLUMNS: &str = r#"
    id, tenant_id, account_id, external_id, doc_type, title, sender,
    received_at, content_hash, storage_path, file_size, mime_type,
    status, archived_at, retention_until, deadline,
    reminder_7d_sent_at, reminder_3d_sent_at, reminder_1d_sent_at,
    metadata, created_at, updated_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub external_id: String,
    pub doc_type: Option<String>,
    pub title: Option<String>,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    pub content_hash: String,
    pub storage_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub archived_at: Option<DateTime<Utc>>,
    pub retention_until: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub reminder_7d_sent_at: Option<DateTime<Utc>>,
    pub reminder_3d_sent_at: Option<DateTime<Utc>>,
    pub reminder_1d_sent_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for document creation, before hashing and storage.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub account_id: Uuid,
    pub external_id: String,
    pub doc_type: Option<String>,
    pub title: Option<String>,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    pub content: bytes::Bytes,
    pub content_type: String,
    pub metadata: serde_json::Value,
}

impl Document {
    pub async fn find_by_id(
        tenant_id: Uuid,
        id: Uuid,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(doc)
    }

    pub async fn find_by_external_id(
        tenant_id: Uuid,
        account_id: Uuid,
        external_id: &str,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents
            WHERE tenant_id = $1 AND account_id = $2 AND external_id = $3
            "#
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

        Ok(doc)
    }

    /// Content-level dedupe lookup: same account, same bytes.
    pub async fn find_by_content_hash(
        tenant_id: Uuid,
        account_id: Uuid,
        content_hash: &str,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents
            WHERE tenant_id = $1 AND account_id = $2 AND content_hash = $3
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(content_hash)
        .fetch_optional(pool)
        .await?;

        Ok(doc)
    }

    /// Mark as read on first content access.
    pub async fn mark_read(tenant_id: Uuid, id: Uuid, pool: &PgPool) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'read', updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'new'
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn set_deadline(
        tenant_id: Uuid,
        id: Uuid,
        deadline: NaiveDate,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET deadline = $1, updated_at = NOW() WHERE id = $2 AND tenant_id = $3",
        )
        .bind(deadline)
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Documents whose deadline falls on `target` and whose reminder for
    /// this offset has not been sent.
    pub async fn due_for_reminder(
        tenant_id: Uuid,
        target: NaiveDate,
        offset: ReminderOffset,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let column = offset.column();
        let docs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents
            WHERE tenant_id = $1
              AND deadline = $2
              AND status <> 'archived'
              AND {column} IS NULL
            ORDER BY received_at
            "#
        ))
        .bind(tenant_id)
        .bind(target)
        .fetch_all(pool)
        .await?;

        Ok(docs)
    }

    /// At-most-once gate for a reminder: set the sent marker only if it is
    /// still NULL. Returns whether this caller won the update.
    pub async fn mark_reminder_sent(
        tenant_id: Uuid,
        id: Uuid,
        offset: ReminderOffset,
        pool: &PgPool,
    ) -> Result<bool> {
        let column = offset.column();
        let result = sqlx::query(&format!(
            r#"
            UPDATE documents
            SET {column} = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND {column} IS NULL
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fresh read of one reminder marker, used to re-check just before
    /// emitting.
    pub async fn reminder_sent_at(
        tenant_id: Uuid,
        id: Uuid,
        offset: ReminderOffset,
        pool: &PgPool,
    ) -> Result<Option<DateTime<Utc>>> {
        let column = offset.column();
        let sent: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(&format!(
            "SELECT {column} FROM documents WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(sent.flatten())
    }

    /// Archive documents whose retention window has passed. Returns the
    /// affected storage paths so the caller can delete the blobs.
    pub async fn archive_past_retention(
        tenant_id: Uuid,
        today: NaiveDate,
        pool: &PgPool,
    ) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET status = 'archived', archived_at = NOW(), updated_at = NOW()
            WHERE tenant_id = $1
              AND retention_until IS NOT NULL
              AND retention_until < $2
              AND status <> 'archived'
            RETURNING storage_path
            "#,
        )
        .bind(tenant_id)
        .bind(today)
        .fetch_all(pool)
        .await?;

        Ok(paths)
    }
}
