//! Filesystem blob store.
//!
//! Keys map to paths under a configured root. Every access canonicalises
//! the joined path and verifies it is still inside the root, so neither a
//! hostile external id nor a corrupted metadata row can read or write
//! outside the store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use super::{BlobContent, BlobKey, BlobStorage, StorageError, StoredBlob};

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create the store, creating the root directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a relative blob path to an absolute path inside the root.
    ///
    /// Rejects absolute inputs, `..` components and anything whose
    /// canonical form escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StorageError::PathTraversal {
                path: path.to_string(),
            });
        }

        let joined = self.root.join(rel);

        // The file may not exist yet, so canonicalise the nearest existing
        // ancestor and re-check containment.
        let mut probe = joined.clone();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }
        let canonical_probe = probe
            .canonicalize()
            .map_err(|_| StorageError::PathTraversal {
                path: path.to_string(),
            })?;
        if !canonical_probe.starts_with(&self.root) {
            return Err(StorageError::PathTraversal {
                path: path.to_string(),
            });
        }

        Ok(joined)
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn store(
        &self,
        key: &BlobKey,
        content: Bytes,
        _content_type: &str,
    ) -> Result<StoredBlob, StorageError> {
        let rel = key.relative_path();
        let abs = self.resolve(&rel)?;

        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size = content.len() as u64;
        tokio::fs::write(&abs, &content).await?;

        Ok(StoredBlob { path: rel, size })
    }

    async fn get(&self, path: &str) -> Result<BlobContent, StorageError> {
        let abs = self.resolve(path)?;

        let bytes = match tokio::fs::read(&abs).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let size = bytes.len() as u64;
        Ok(BlobContent {
            bytes: Bytes::from(bytes),
            content_type: None,
            size,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let abs = self.resolve(path)?;
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let abs = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&abs).await?)
    }

    async fn signed_url(
        &self,
        _path: &str,
        _ttl: Duration,
    ) -> Result<Option<String>, StorageError> {
        // Local files are served by the application, not by URL.
        Ok(None)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.resolve(prefix)?;
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    results.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        results.sort();
        Ok(results)
    }

    async fn usage(&self, tenant_id: Uuid) -> Result<u64, StorageError> {
        let prefix = BlobKey::tenant_prefix(tenant_id);
        let base = self.resolve(prefix.trim_end_matches('/'))?;
        if !base.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    total += entry.metadata().await?.len();
                }
            }
        }

        Ok(total)
    }
}
