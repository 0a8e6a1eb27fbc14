//! Filesystem blob store behaviour, including the traversal guard.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use backoffice_core::kernel::storage::{BlobKey, BlobStorage, LocalStorage, StorageError};

fn key_for(tenant: Uuid, account: Uuid, name: &str) -> BlobKey {
    BlobKey::for_document(
        tenant,
        account,
        name,
        "application/pdf",
        Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn store_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();

    let tenant = Uuid::new_v4();
    let key = key_for(tenant, Uuid::new_v4(), "FN-1");

    let stored = storage
        .store(&key, Bytes::from_static(b"PDFA"), "application/pdf")
        .await
        .unwrap();
    assert_eq!(stored.size, 4);
    assert!(stored.path.ends_with("FN-1.pdf"));
    assert!(stored.path.starts_with(&tenant.to_string()));

    let content = storage.get(&stored.path).await.unwrap();
    assert_eq!(&content.bytes[..], b"PDFA");
    assert!(storage.exists(&stored.path).await.unwrap());
}

#[tokio::test]
async fn get_missing_blob_is_not_found() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();

    let result = storage.get("nope/accounts/missing/2025/06/x.pdf").await;
    assert!(matches!(result, Err(StorageError::NotFound { .. })));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();

    let key = key_for(Uuid::new_v4(), Uuid::new_v4(), "FN-2");
    let stored = storage
        .store(&key, Bytes::from_static(b"X"), "application/pdf")
        .await
        .unwrap();

    storage.delete(&stored.path).await.unwrap();
    storage.delete(&stored.path).await.unwrap();
    assert!(!storage.exists(&stored.path).await.unwrap());
}

#[tokio::test]
async fn traversal_attempts_are_rejected() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();

    for path in [
        "../outside.txt",
        "tenant/../../outside.txt",
        "/etc/passwd",
    ] {
        let result = storage.get(path).await;
        assert!(
            matches!(result, Err(StorageError::PathTraversal { .. })),
            "{path} should be rejected"
        );
    }
}

#[tokio::test]
async fn usage_sums_only_the_tenant() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();

    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    let account = Uuid::new_v4();

    storage
        .store(
            &key_for(tenant_a, account, "a1"),
            Bytes::from(vec![0u8; 100]),
            "application/pdf",
        )
        .await
        .unwrap();
    storage
        .store(
            &key_for(tenant_a, account, "a2"),
            Bytes::from(vec![0u8; 50]),
            "application/pdf",
        )
        .await
        .unwrap();
    storage
        .store(
            &key_for(tenant_b, account, "b1"),
            Bytes::from(vec![0u8; 7]),
            "application/pdf",
        )
        .await
        .unwrap();

    assert_eq!(storage.usage(tenant_a).await.unwrap(), 150);
    assert_eq!(storage.usage(tenant_b).await.unwrap(), 7);
    assert_eq!(storage.usage(Uuid::new_v4()).await.unwrap(), 0);
}

#[tokio::test]
async fn list_returns_tenant_prefixed_paths() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();

    let tenant = Uuid::new_v4();
    let account = Uuid::new_v4();
    storage
        .store(
            &key_for(tenant, account, "doc"),
            Bytes::from_static(b"Y"),
            "application/pdf",
        )
        .await
        .unwrap();

    let listed = storage.list(&tenant.to_string()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].contains("/accounts/"));
}

#[tokio::test]
async fn local_storage_has_no_signed_urls() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path()).await.unwrap();
    let url = storage
        .signed_url("whatever/x.pdf", std::time::Duration::from_secs(60))
        .await
        .unwrap();
    assert!(url.is_none());
}
