// Consistency of the in-memory backend under concurrent writers and listers.

mod common;

use common::seeded_bytes;
use depot_storage::{ListMode, MemoryBackend, ObjectStore, StorageError, UserMetadata, bytes_stream};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;

const BUCKET: &str = "consistency";

async fn versioned_backend() -> Arc<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend.make_bucket(BUCKET).await.unwrap();
    backend.enable_versioning(BUCKET).await.unwrap();
    Arc::new(backend)
}

async fn put(backend: &MemoryBackend, key: &str, seed: u64) {
    backend
        .put(
            BUCKET,
            key,
            bytes_stream(seeded_bytes(seed, 64)),
            "application/octet-stream",
            &UserMetadata::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_puts_to_one_key_keep_every_version() {
    let backend = versioned_backend().await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let backend = backend.clone();
            tokio::spawn(async move { put(&backend, "shared", i).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let versions: Vec<_> = backend
        .list_objects(BUCKET, "shared", ListMode::AllVersions)
        .map(|entry| entry.unwrap())
        .collect()
        .await;
    assert_eq!(versions.len(), 20);

    let ids: HashSet<_> = versions.iter().map(|v| v.version_id.clone()).collect();
    assert_eq!(ids.len(), 20, "version ids must be distinct");
    assert_eq!(versions.iter().filter(|v| v.is_latest).count(), 1);
    assert!(
        versions
            .windows(2)
            .all(|pair| pair[0].last_modified < pair[1].last_modified),
        "versions must have strictly increasing timestamps"
    );
}

#[tokio::test]
async fn test_concurrent_create_during_listing() {
    let backend = versioned_backend().await;
    for i in 0..100 {
        put(&backend, &format!("test/{i:03}"), i).await;
    }

    let lister = backend.clone();
    let list_handle = tokio::spawn(async move {
        let mut stream = lister.list_objects(BUCKET, "test/", ListMode::Latest);
        let mut keys = Vec::new();
        while let Some(entry) = stream.next().await {
            keys.push(entry.unwrap().name);
            tokio::task::yield_now().await;
        }
        keys
    });

    let creator = backend.clone();
    let create_handle = tokio::spawn(async move {
        for i in 100..150 {
            put(&creator, &format!("test/{i:03}"), i).await;
        }
    });

    let (keys, created) = tokio::join!(list_handle, create_handle);
    let keys = keys.unwrap();
    created.unwrap();

    let unique: HashSet<_> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len(), "listing returned duplicate keys");
    assert!(keys.len() >= 100);
    for i in 0..100 {
        assert!(unique.contains(&format!("test/{i:03}")));
    }
}

#[tokio::test]
async fn test_listing_is_a_snapshot() {
    let backend = versioned_backend().await;
    for i in 0..10 {
        put(&backend, &format!("item-{i}"), i).await;
    }

    let mut stream = backend.list_objects(BUCKET, "", ListMode::Latest);
    for i in 0..10 {
        backend.remove(BUCKET, &format!("item-{i}")).await.unwrap();
    }

    let mut seen = 0;
    while let Some(entry) = stream.next().await {
        entry.unwrap();
        seen += 1;
    }
    assert_eq!(seen, 10);

    let after: Vec<_> = backend
        .list_objects(BUCKET, "", ListMode::Latest)
        .collect()
        .await;
    assert!(after.is_empty());
}

#[tokio::test]
async fn test_missing_object_after_remove() {
    let backend = versioned_backend().await;
    put(&backend, "gone", 1).await;
    backend.remove(BUCKET, "gone").await.unwrap();

    assert!(matches!(
        backend.get(BUCKET, "gone", None).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        backend.stat(BUCKET, "gone").await,
        Err(StorageError::NotFound(_))
    ));
    // Removing again is still fine.
    backend.remove(BUCKET, "gone").await.unwrap();
}
