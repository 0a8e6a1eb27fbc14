//! Document ingestion: dedupe, content-address, store, persist.

use bytes::Bytes;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::common::utils::content_hash;
use crate::kernel::storage::{BlobContent, BlobKey, BlobStorage, StorageError};

use super::document::{Document, NewDocument};

#[derive(Debug, Error)]
pub enum DocumentError {
    /// Lookup miss. Also returned for documents of other tenants - callers
    /// cannot distinguish "not yours" from "not there".
    #[error("document not found")]
    NotFound,

    #[error("document too large: {size} bytes (limit {max})")]
    TooLarge { size: usize, max: usize },

    /// A concurrent insert beat us and violated a uniqueness constraint.
    #[error("conflicting document insert")]
    Conflict,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How a create call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new blob and row were written.
    Created,
    /// The (account, external_id) pair already existed.
    DuplicateExternalId,
    /// The same bytes already exist for this account under a different
    /// external id; no second blob was written.
    DuplicateContent,
}

/// Ingestion facade over the metadata rows and the blob store.
pub struct DocumentStore {
    pool: PgPool,
    storage: Arc<dyn BlobStorage>,
    max_size_bytes: usize,
}

impl DocumentStore {
    pub fn new(pool: PgPool, storage: Arc<dyn BlobStorage>, max_size_bytes: usize) -> Self {
        Self {
            pool,
            storage,
            max_size_bytes,
        }
    }

    /// Create a document for a tenant, idempotently.
    ///
    /// 1. An existing (account, external_id) row is returned as-is.
    /// 2. Content over the size cap is rejected (the cap itself is allowed).
    /// 3. An existing (account, content_hash) row is returned without
    ///    writing a second blob.
    /// 4. Otherwise the blob is stored, then the row inserted; a failed
    ///    insert deletes the blob again.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        input: NewDocument,
    ) -> Result<(Document, CreateOutcome), DocumentError> {
        if let Some(existing) = Document::find_by_external_id(
            tenant_id,
            input.account_id,
            &input.external_id,
            &self.pool,
        )
        .await?
        {
            return Ok((existing, CreateOutcome::DuplicateExternalId));
        }

        let size = input.content.len();
        if size > self.max_size_bytes {
            return Err(DocumentError::TooLarge {
                size,
                max: self.max_size_bytes,
            });
        }

        let hash = content_hash(&input.content);
        if let Some(existing) =
            Document::find_by_content_hash(tenant_id, input.account_id, &hash, &self.pool).await?
        {
            debug!(
                tenant_id = %tenant_id,
                external_id = %input.external_id,
                existing_id = %existing.id,
                "content dedupe hit"
            );
            return Ok((existing, CreateOutcome::DuplicateContent));
        }

        let key = BlobKey::for_document(
            tenant_id,
            input.account_id,
            &input.external_id,
            &input.content_type,
            input.received_at,
        );
        let stored = self
            .storage
            .store(&key, input.content.clone(), &input.content_type)
            .await?;

        match self.insert_row(tenant_id, &input, &hash, &stored.path, size).await {
            Ok(doc) => Ok((doc, CreateOutcome::Created)),
            Err(e) => {
                // Compensating action: the row is the source of truth, so a
                // blob without a row must not linger.
                if let Err(del) = self.storage.delete(&stored.path).await {
                    warn!(path = %stored.path, error = %del, "orphan blob cleanup failed");
                }

                if let DocumentError::Database(sqlx::Error::Database(db_err)) = &e {
                    if db_err.is_unique_violation() {
                        // Concurrent ingest won; return its row, whichever
                        // uniqueness constraint it came in through.
                        if let Some(existing) = Document::find_by_external_id(
                            tenant_id,
                            input.account_id,
                            &input.external_id,
                            &self.pool,
                        )
                        .await?
                        {
                            return Ok((existing, CreateOutcome::DuplicateExternalId));
                        }
                        if let Some(existing) = Document::find_by_content_hash(
                            tenant_id,
                            input.account_id,
                            &hash,
                            &self.pool,
                        )
                        .await?
                        {
                            return Ok((existing, CreateOutcome::DuplicateContent));
                        }
                        return Err(DocumentError::Conflict);
                    }
                }
                Err(e)
            }
        }
    }

    /// Fetch a document's bytes, marking it read on first access.
    pub async fn fetch_content(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<(Document, BlobContent), DocumentError> {
        let doc = Document::find_by_id(tenant_id, document_id, &self.pool)
            .await?
            .ok_or(DocumentError::NotFound)?;

        let content = self.storage.get(&doc.storage_path).await?;
        Document::mark_read(tenant_id, doc.id, &self.pool).await?;

        Ok((doc, content))
    }

    async fn insert_row(
        &self,
        tenant_id: Uuid,
        input: &NewDocument,
        hash: &str,
        storage_path: &str,
        size: usize,
    ) -> Result<Document, DocumentError> {
        let doc = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (
                id, tenant_id, account_id, external_id, doc_type, title, sender,
                received_at, content_hash, storage_path, file_size, mime_type,
                status, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'new', $13, NOW(), NOW())
            RETURNING id, tenant_id, account_id, external_id, doc_type, title, sender,
                      received_at, content_hash, storage_path, file_size, mime_type,
                      status, archived_at, retention_until, deadline,
                      reminder_7d_sent_at, reminder_3d_sent_at, reminder_1d_sent_at,
                      metadata, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(input.account_id)
        .bind(&input.external_id)
        .bind(&input.doc_type)
        .bind(&input.title)
        .bind(&input.sender)
        .bind(input.received_at)
        .bind(hash)
        .bind(storage_path)
        .bind(size as i64)
        .bind(&input.content_type)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(doc)
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }
}

/// Size-cap check, factored out for the boundary tests: exactly the cap is
/// accepted, one byte over is rejected.
pub fn exceeds_size_cap(content: &Bytes, max: usize) -> bool {
    content.len() > max
}
