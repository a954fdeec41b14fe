//! In-process storage backend with native versioning and tagging.
//!
//! Follows S3 semantics where they matter to callers: puts are atomic, tags
//! belong to the current version and are cleared by a new put, removing an
//! absent key succeeds, and version ids are only assigned once versioning is
//! enabled on the bucket.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, GetOutput, ListMode, ObjectEntry, ObjectMeta, ObjectStore, ObjectStream,
    PutOutcome, UserMetadata, collect_bytes,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use depot_core::TagMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct MemoryBucket {
    versioning: bool,
    objects: BTreeMap<String, StoredObject>,
    /// Timestamp of the most recent write, so successive writes never tie.
    last_write: Option<OffsetDateTime>,
}

impl MemoryBucket {
    fn next_timestamp(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let stamp = match self.last_write {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        self.last_write = Some(stamp);
        stamp
    }
}

struct StoredObject {
    /// Oldest first; the last entry is the current version.
    versions: Vec<StoredVersion>,
    tags: TagMap,
}

impl StoredObject {
    fn latest(&self) -> Option<&StoredVersion> {
        self.versions.last()
    }
}

#[derive(Clone)]
struct StoredVersion {
    version_id: Option<String>,
    data: Bytes,
    content_type: String,
    metadata: UserMetadata,
    last_modified: OffsetDateTime,
    etag: String,
}

impl StoredVersion {
    fn meta(&self) -> ObjectMeta {
        ObjectMeta {
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
            etag: Some(self.etag.clone()),
            content_type: Some(self.content_type.clone()),
            version_id: self.version_id.clone(),
            metadata: self.metadata.clone(),
        }
    }

    fn entry(&self, name: &str, is_latest: bool) -> ObjectEntry {
        ObjectEntry {
            name: name.to_string(),
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
            etag: Some(self.etag.clone()),
            version_id: self.version_id.clone(),
            is_latest,
        }
    }
}

/// Object store held entirely in memory.
#[derive(Default)]
pub struct MemoryBackend {
    buckets: DashMap<String, MemoryBucket>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn etag(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn chunked(data: Bytes) -> ByteStream {
        let chunks: Vec<StorageResult<Bytes>> = (0..data.len())
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + STREAM_CHUNK_SIZE).min(data.len()))))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    #[instrument(skip(self, body, metadata), fields(backend = "memory"))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> StorageResult<PutOutcome> {
        if !self.buckets.contains_key(bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        // Nothing is visible until the whole body has arrived.
        let data = collect_bytes(body).await?;

        let mut state = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        let last_modified = state.next_timestamp();
        let version_id = state.versioning.then(|| Uuid::new_v4().simple().to_string());
        let version = StoredVersion {
            version_id: version_id.clone(),
            etag: Self::etag(&data),
            data,
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
            last_modified,
        };
        let outcome = PutOutcome {
            size: version.data.len() as u64,
            version_id,
            etag: Some(version.etag.clone()),
        };

        let versioning = state.versioning;
        let object = state
            .objects
            .entry(key.to_string())
            .or_insert_with(|| StoredObject {
                versions: Vec::new(),
                tags: TagMap::new(),
            });
        if !versioning {
            object.versions.clear();
        }
        object.versions.push(version);
        object.tags = TagMap::new();

        Ok(outcome)
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<GetOutput> {
        let state = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        let object = state
            .objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let version = match version_id {
            Some(id) => object
                .versions
                .iter()
                .find(|v| v.version_id.as_deref() == Some(id)),
            None => object.latest(),
        }
        .ok_or_else(|| StorageError::NotFound(format!("{key}@{}", version_id.unwrap_or("latest"))))?;

        Ok(GetOutput {
            meta: version.meta(),
            body: Self::chunked(version.data.clone()),
        })
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let state = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        state
            .objects
            .get(key)
            .and_then(StoredObject::latest)
            .map(StoredVersion::meta)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        state.objects.remove(key);
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str, mode: ListMode) -> ObjectStream {
        let Some(state) = self.buckets.get(bucket) else {
            let err = StorageError::BucketNotFound(bucket.to_string());
            return Box::pin(futures::stream::once(async move { Err(err) }));
        };

        let mut entries = Vec::new();
        for (name, object) in state.objects.range(prefix.to_string()..) {
            if !name.starts_with(prefix) {
                break;
            }
            match mode {
                ListMode::Latest => {
                    if let Some(latest) = object.latest() {
                        entries.push(Ok(latest.entry(name, true)));
                    }
                }
                ListMode::AllVersions => {
                    let last = object.versions.len().saturating_sub(1);
                    entries.extend(
                        object
                            .versions
                            .iter()
                            .enumerate()
                            .map(|(i, v)| Ok(v.entry(name, i == last))),
                    );
                }
            }
        }

        Box::pin(futures::stream::iter(entries))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagMap> {
        let state = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        state
            .objects
            .get(key)
            .map(|object| object.tags.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    #[instrument(skip(self, tags), fields(backend = "memory", count = tags.len()))]
    async fn set_tags(&self, bucket: &str, key: &str, tags: &TagMap) -> StorageResult<()> {
        let mut state = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        object.tags = tags.clone();
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn enable_versioning(&self, bucket: &str) -> StorageResult<()> {
        let mut state = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        state.versioning = true;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::bytes_stream;
    use futures::StreamExt;

    async fn backend_with(bucket: &str, versioning: bool) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.make_bucket(bucket).await.unwrap();
        if versioning {
            backend.enable_versioning(bucket).await.unwrap();
        }
        backend
    }

    async fn put_str(backend: &MemoryBackend, bucket: &str, key: &str, data: &'static str) {
        backend
            .put(bucket, key, bytes_stream(data), "text/plain", &UserMetadata::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_without_versioning_overwrites() {
        let backend = backend_with("b", false).await;
        put_str(&backend, "b", "k", "one").await;
        put_str(&backend, "b", "k", "two").await;

        let versions: Vec<_> = backend
            .list_objects("b", "k", ListMode::AllVersions)
            .collect()
            .await;
        assert_eq!(versions.len(), 1);
        let entry = versions[0].as_ref().unwrap();
        assert!(entry.version_id.is_none());
        assert!(entry.is_latest);
    }

    #[tokio::test]
    async fn test_versions_get_distinct_increasing_timestamps() {
        let backend = backend_with("b", true).await;
        for data in ["1", "2", "3"] {
            put_str(&backend, "b", "k", data).await;
        }

        let entries: Vec<ObjectEntry> = backend
            .list_objects("b", "k", ListMode::AllVersions)
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(entries.len(), 3);
        assert!(entries[0].last_modified < entries[1].last_modified);
        assert!(entries[1].last_modified < entries[2].last_modified);
        assert_eq!(entries.iter().filter(|e| e.is_latest).count(), 1);
        assert!(entries[2].is_latest);
    }

    #[tokio::test]
    async fn test_get_specific_version() {
        let backend = backend_with("b", true).await;
        let first = backend
            .put("b", "k", bytes_stream("old"), "text/plain", &UserMetadata::new())
            .await
            .unwrap();
        put_str(&backend, "b", "k", "new").await;

        let id = first.version_id.unwrap();
        let output = backend.get("b", "k", Some(&id)).await.unwrap();
        assert_eq!(collect_bytes(output.body).await.unwrap().as_ref(), b"old");

        let missing = backend.get("b", "k", Some("nope")).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_new_put_clears_tags() {
        let backend = backend_with("b", false).await;
        put_str(&backend, "b", "k", "data").await;
        backend
            .set_tags("b", "k", &TagMap::from_pairs([("tag-0", "x")]))
            .await
            .unwrap();
        put_str(&backend, "b", "k", "data2").await;
        assert!(backend.get_tags("b", "k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_bucket_and_key_errors() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.stat("nope", "k").await,
            Err(StorageError::BucketNotFound(_))
        ));
        backend.make_bucket("b").await.unwrap();
        assert!(matches!(
            backend.stat("b", "k").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(backend.remove("b", "k").await.is_ok());
        assert!(matches!(
            backend.set_tags("b", "k", &TagMap::new()).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_large_object_is_streamed_in_chunks() {
        let backend = backend_with("b", false).await;
        let data = Bytes::from(vec![7u8; STREAM_CHUNK_SIZE * 2 + 10]);
        backend
            .put("b", "big", bytes_stream(data.clone()), "application/octet-stream", &UserMetadata::new())
            .await
            .unwrap();

        let output = backend.get("b", "big", None).await.unwrap();
        let chunks: Vec<_> = output.body.collect().await;
        assert_eq!(chunks.len(), 3);
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, data.len());
    }

    #[tokio::test]
    async fn test_listing_respects_prefix() {
        let backend = backend_with("b", false).await;
        for key in ["docs/a", "docs/b", "img/c"] {
            put_str(&backend, "b", key, "x").await;
        }
        let names: Vec<String> = backend
            .list_objects("b", "docs/", ListMode::Latest)
            .map(|e| e.unwrap().name)
            .collect()
            .await;
        assert_eq!(names, vec!["docs/a", "docs/b"]);
    }
}
