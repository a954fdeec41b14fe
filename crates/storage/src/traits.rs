//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use depot_core::TagMap;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of listing entries.
pub type ObjectStream = Pin<Box<dyn Stream<Item = StorageResult<ObjectEntry>> + Send>>;

/// User metadata attached to an object at write time.
pub type UserMetadata = BTreeMap<String, String>;

/// Content type used when the caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object store abstraction over a set of named buckets.
///
/// Every operation names its bucket explicitly; backends do not carry a default.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Write an object from a byte stream in one atomic put.
    ///
    /// The object is committed only once `body` ends without error. A failed or
    /// abandoned body leaves any previous object (or version) untouched.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> StorageResult<PutOutcome>;

    /// Read an object, or a specific version of it.
    async fn get(&self, bucket: &str, key: &str, version_id: Option<&str>)
    -> StorageResult<GetOutput>;

    /// Fetch an object's attributes without its content.
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Remove an object. Removing an absent key succeeds.
    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Lazily list every object under `prefix`, recursively.
    fn list_objects(&self, bucket: &str, prefix: &str, mode: ListMode) -> ObjectStream;

    /// Read an object's tag map.
    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagMap>;

    /// Replace an object's tag map entirely.
    async fn set_tags(&self, bucket: &str, key: &str, tags: &TagMap) -> StorageResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn make_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Turn on native object versioning for a bucket.
    async fn enable_versioning(&self, bucket: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "memory").
    fn backend_name(&self) -> &'static str;
}

/// What a listing should enumerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListMode {
    /// Current objects only.
    Latest,
    /// Every stored version of every object.
    AllVersions,
}

/// Result of a successful put.
#[derive(Clone, Debug)]
pub struct PutOutcome {
    /// Bytes written.
    pub size: u64,
    /// Version id assigned by the backend, when versioning is enabled.
    pub version_id: Option<String>,
    pub etag: Option<String>,
}

/// Attributes of a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
    /// Content type (if available).
    pub content_type: Option<String>,
    pub version_id: Option<String>,
    /// User metadata recorded at write time.
    pub metadata: UserMetadata,
}

/// One entry of a listing.
#[derive(Clone, Debug)]
pub struct ObjectEntry {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
    /// Set for version listings.
    pub version_id: Option<String>,
    /// Whether this entry is the current version of its object.
    pub is_latest: bool,
}

/// A streaming read.
pub struct GetOutput {
    pub meta: ObjectMeta,
    pub body: ByteStream,
}

impl std::fmt::Debug for GetOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetOutput")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into one buffer.
pub async fn collect_bytes(mut body: ByteStream) -> StorageResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}
