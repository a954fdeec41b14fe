#![allow(dead_code)]

use async_trait::async_trait;
use depot_core::TagMap;
use depot_storage::{
    ByteStream, GetOutput, ListMode, ObjectMeta, ObjectStore, ObjectStream, PutOutcome,
    StorageError, StorageResult, UserMetadata,
};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Wraps a store and injects failures.
///
/// - broken buckets fail every call;
/// - broken keys fail `stat` only;
/// - deleted keys behave like a versioned delete: reads miss, history remains
///   but no version is current.
pub struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    broken: Mutex<HashSet<String>>,
    broken_keys: Mutex<HashSet<String>>,
    deleted: Mutex<HashSet<(String, String)>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            broken: Mutex::new(HashSet::new()),
            broken_keys: Mutex::new(HashSet::new()),
            deleted: Mutex::new(HashSet::new()),
        }
    }

    pub fn break_bucket(&self, bucket: &str) {
        self.broken.lock().unwrap().insert(bucket.to_string());
    }

    pub fn break_stat(&self, key: &str) {
        self.broken_keys.lock().unwrap().insert(key.to_string());
    }

    /// Leave a delete marker on `key` in `bucket`.
    pub fn mark_deleted(&self, bucket: &str, key: &str) {
        self.deleted
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    pub fn heal(&self) {
        self.broken.lock().unwrap().clear();
        self.broken_keys.lock().unwrap().clear();
    }

    fn check(&self, bucket: &str) -> StorageResult<()> {
        if self.broken.lock().unwrap().contains(bucket) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{bucket} is unreachable"),
            )));
        }
        Ok(())
    }

    fn check_live(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.check(bucket)?;
        let marker = (bucket.to_string(), key.to_string());
        if self.deleted.lock().unwrap().contains(&marker) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    fn deleted_in(&self, bucket: &str) -> HashSet<String> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> StorageResult<PutOutcome> {
        self.check(bucket)?;
        self.inner
            .put(bucket, key, body, content_type, metadata)
            .await
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<GetOutput> {
        self.check_live(bucket, key)?;
        self.inner.get(bucket, key, version_id).await
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.check_live(bucket, key)?;
        if self.broken_keys.lock().unwrap().contains(key) {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "metadata for {key} is unavailable"
            ))));
        }
        self.inner.stat(bucket, key).await
    }

    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.check(bucket)?;
        self.inner.remove(bucket, key).await
    }

    fn list_objects(&self, bucket: &str, prefix: &str, mode: ListMode) -> ObjectStream {
        if let Err(err) = self.check(bucket) {
            return Box::pin(futures::stream::once(async move { Err(err) }));
        }
        let deleted = self.deleted_in(bucket);
        let entries = self.inner.list_objects(bucket, prefix, mode);
        match mode {
            ListMode::Latest => Box::pin(entries.filter(move |entry| {
                let hidden = matches!(entry, Ok(e) if deleted.contains(&e.name));
                futures::future::ready(!hidden)
            })),
            ListMode::AllVersions => Box::pin(entries.map(move |entry| {
                entry.map(|mut e| {
                    if deleted.contains(&e.name) {
                        e.is_latest = false;
                    }
                    e
                })
            })),
        }
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagMap> {
        self.check_live(bucket, key)?;
        self.inner.get_tags(bucket, key).await
    }

    async fn set_tags(&self, bucket: &str, key: &str, tags: &TagMap) -> StorageResult<()> {
        self.check_live(bucket, key)?;
        self.inner.set_tags(bucket, key, tags).await
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.check(bucket)?;
        self.inner.bucket_exists(bucket).await
    }

    async fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.check(bucket)?;
        self.inner.make_bucket(bucket).await
    }

    async fn enable_versioning(&self, bucket: &str) -> StorageResult<()> {
        self.check(bucket)?;
        self.inner.enable_versioning(bucket).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
