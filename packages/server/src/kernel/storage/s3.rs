//! S3-compatible blob store.
//!
//! Works against AWS S3 and anything speaking its API (MinIO, Ceph RGW).
//! Tenant scoping is by key prefix inside one bucket.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use uuid::Uuid;

use super::{BlobContent, BlobKey, BlobStorage, StorageError, StoredBlob};

pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build from the ambient AWS environment (credentials chain, region).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }

    fn backend_err(e: impl std::fmt::Display) -> StorageError {
        StorageError::Backend(e.to_string())
    }
}

#[async_trait]
impl BlobStorage for S3Storage {
    async fn store(
        &self,
        key: &BlobKey,
        content: Bytes,
        content_type: &str,
    ) -> Result<StoredBlob, StorageError> {
        let path = key.relative_path();
        let size = content.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&path)
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(Self::backend_err)?;

        Ok(StoredBlob { path, size })
    }

    async fn get(&self, path: &str) -> Result<BlobContent, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound {
                        path: path.to_string(),
                    }
                } else {
                    Self::backend_err(service_err)
                }
            })?;

        let content_type = output.content_type().map(|s| s.to_string());
        let bytes = output
            .body
            .collect()
            .await
            .map_err(Self::backend_err)?
            .into_bytes();

        let size = bytes.len() as u64;
        Ok(BlobContent {
            bytes,
            content_type,
            size,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(Self::backend_err)?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(Self::backend_err(service_err))
                }
            }
        }
    }

    async fn signed_url(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StorageError> {
        let config = PresigningConfig::expires_in(ttl).map_err(Self::backend_err)?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(config)
            .await
            .map_err(Self::backend_err)?;

        Ok(Some(presigned.uri().to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut results = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(Self::backend_err)?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    results.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(results)
    }

    async fn usage(&self, tenant_id: Uuid) -> Result<u64, StorageError> {
        let prefix = BlobKey::tenant_prefix(tenant_id);
        let mut total = 0u64;
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(Self::backend_err)?;

            for object in output.contents() {
                total += object.size().unwrap_or(0).max(0) as u64;
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(total)
    }
}
