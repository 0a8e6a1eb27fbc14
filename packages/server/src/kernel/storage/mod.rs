//! Blob storage abstraction.
//!
//! Documents live in a blob store keyed by
//! `<tenant>/accounts/<account>/<YYYY>/<MM>/<filename>`; the metadata rows
//! in Postgres hold the key. Two backends exist: local filesystem for
//! single-node deployments and S3-compatible object storage. Handlers
//! never concatenate paths themselves - they go through [`BlobKey`].

mod local;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::common::utils::blob_filename;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {path}")]
    NotFound { path: String },

    /// The requested path would resolve outside the storage root.
    #[error("path escapes storage root: {path}")]
    PathTraversal { path: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Addressing for a blob about to be stored.
#[derive(Debug, Clone)]
pub struct BlobKey {
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub filename: String,
    pub received_at: DateTime<Utc>,
}

impl BlobKey {
    /// Derive the key for a portal document.
    pub fn for_document(
        tenant_id: Uuid,
        account_id: Uuid,
        external_id: &str,
        mime_type: &str,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            account_id,
            filename: blob_filename(external_id, mime_type),
            received_at,
        }
    }

    /// Relative storage path: `<tenant>/accounts/<account>/<YYYY>/<MM>/<filename>`.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/accounts/{}/{:04}/{:02}/{}",
            self.tenant_id,
            self.account_id,
            self.received_at.year(),
            self.received_at.month(),
            self.filename
        )
    }

    /// Prefix owned by one tenant, used for usage accounting and listing.
    pub fn tenant_prefix(tenant_id: Uuid) -> String {
        format!("{tenant_id}/")
    }
}

/// A stored blob's address and size.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub path: String,
    pub size: u64,
}

/// Retrieved blob content.
#[derive(Debug, Clone)]
pub struct BlobContent {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub size: u64,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store a blob under the key. Overwrites an existing blob at the same
    /// path (same key means same content by construction).
    async fn store(
        &self,
        key: &BlobKey,
        content: Bytes,
        content_type: &str,
    ) -> Result<StoredBlob, StorageError>;

    async fn get(&self, path: &str) -> Result<BlobContent, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// A pre-signed GET URL when the backend supports it, `None` otherwise.
    async fn signed_url(
        &self,
        path: &str,
        ttl: std::time::Duration,
    ) -> Result<Option<String>, StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Total bytes stored for one tenant.
    async fn usage(&self, tenant_id: Uuid) -> Result<u64, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn relative_path_follows_layout() {
        let tenant = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let account = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        let received = Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap();

        let key = BlobKey::for_document(tenant, account, "FN-1", "application/pdf", received);

        assert_eq!(
            key.relative_path(),
            format!("{tenant}/accounts/{account}/2025/06/FN-1.pdf")
        );
    }

    #[test]
    fn key_sanitizes_external_id() {
        let key = BlobKey::for_document(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "../evil id",
            "application/pdf",
            Utc::now(),
        );
        assert_eq!(key.filename, ".._evil_id.pdf");
    }
}
