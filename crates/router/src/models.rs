//! Request and response types for router operations.

use depot_core::{Bucket, CallerIdentity};
use depot_storage::{ByteStream, DEFAULT_CONTENT_TYPE, ObjectEntry, ObjectMeta, UserMetadata};
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Object metadata key holding the uploader's username.
pub const META_CREATED_BY: &str = "created-by";
/// Object metadata key holding the uploader's user id.
pub const META_CREATED_BY_ID: &str = "created-by-id";
/// Object metadata key holding the upload time (RFC 3339).
pub const META_CREATED_AT: &str = "created-at";

/// Payload of an upload.
pub struct UploadRequest {
    pub body: ByteStream,
    /// Defaults to `application/octet-stream`.
    pub content_type: Option<String>,
    /// Tags to attach after the write. `None` leaves the tag set untouched.
    pub tags: Option<Vec<String>>,
    /// Workflow fields (category, reviewed, tested, ...) stored as object metadata.
    pub extra: BTreeMap<String, String>,
}

impl UploadRequest {
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            content_type: None,
            tags: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("content_type", &self.content_type)
            .field("tags", &self.tags)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Attribute bag recorded on a blob at upload time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlobMetadata {
    pub content_type: Option<String>,
    pub created_by: Option<String>,
    pub created_by_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Every other metadata field, verbatim.
    pub extra: BTreeMap<String, String>,
}

impl BlobMetadata {
    pub(crate) fn for_upload(
        caller: &CallerIdentity,
        content_type: &str,
        extra: BTreeMap<String, String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            created_by: Some(caller.username.clone()),
            created_by_id: Some(caller.user_id),
            created_at: Some(now),
            extra,
        }
    }

    /// Flatten into backend user metadata. System fields override same-named extras.
    pub fn to_user_metadata(&self) -> UserMetadata {
        let mut metadata = self.extra.clone();
        if let Some(created_by) = &self.created_by {
            metadata.insert(META_CREATED_BY.to_string(), created_by.clone());
        }
        if let Some(id) = self.created_by_id {
            metadata.insert(META_CREATED_BY_ID.to_string(), id.to_string());
        }
        if let Some(created_at) = self.created_at.and_then(|t| t.format(&Rfc3339).ok()) {
            metadata.insert(META_CREATED_AT.to_string(), created_at);
        }
        metadata
    }

    /// Rebuild from backend attributes. Unparseable system fields are dropped.
    pub fn from_object(meta: &ObjectMeta) -> Self {
        let mut extra = meta.metadata.clone();
        let created_by = extra.remove(META_CREATED_BY);
        let created_by_id = extra
            .remove(META_CREATED_BY_ID)
            .and_then(|id| Uuid::parse_str(&id).ok());
        let created_at = extra
            .remove(META_CREATED_AT)
            .and_then(|at| OffsetDateTime::parse(&at, &Rfc3339).ok());

        Self {
            content_type: meta.content_type.clone(),
            created_by,
            created_by_id,
            created_at,
            extra,
        }
    }
}

/// Result of an upload.
#[derive(Clone, Debug, Serialize)]
pub struct StoredBlob {
    pub name: String,
    pub bucket: Bucket,
    pub size: u64,
    pub version_id: Option<String>,
}

/// A streaming read and the bucket that served it.
pub struct Download {
    pub bucket: Bucket,
    pub meta: ObjectMeta,
    pub body: ByteStream,
}

impl Download {
    pub fn metadata(&self) -> BlobMetadata {
        BlobMetadata::from_object(&self.meta)
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("bucket", &self.bucket)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// A listed blob with its attributes.
#[derive(Clone, Debug, Serialize)]
pub struct BlobInfo {
    pub name: String,
    /// Bucket the blob was found in first.
    pub bucket: Bucket,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
    pub metadata: BlobMetadata,
}

impl BlobInfo {
    pub(crate) fn new(name: String, bucket: Bucket, meta: &ObjectMeta) -> Self {
        Self {
            name,
            bucket,
            size: meta.size,
            last_modified: meta.last_modified,
            etag: meta.etag.clone(),
            metadata: BlobMetadata::from_object(meta),
        }
    }
}

/// One revision of a blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub version_id: Option<String>,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
    pub is_latest: bool,
}

impl From<ObjectEntry> for VersionInfo {
    fn from(entry: ObjectEntry) -> Self {
        Self {
            version_id: entry.version_id,
            size: entry.size,
            last_modified: entry.last_modified,
            etag: entry.etag,
            is_latest: entry.is_latest,
        }
    }
}

pub(crate) fn content_type_or_default(content_type: Option<&str>) -> &str {
    content_type
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
