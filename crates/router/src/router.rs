//! The blob router.

use crate::error::{RouterError, RouterResult};
use crate::fallback::first_success;
use crate::models::{
    BlobInfo, BlobMetadata, Download, StoredBlob, UploadRequest, VersionInfo,
    content_type_or_default,
};
use depot_core::config::AppConfig;
use depot_core::{Bucket, BucketPair, CallerIdentity, VisibilityPolicy, tags};
use depot_storage::{ListMode, ObjectStore, StorageError};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Routes blob operations to the working and stable buckets by caller role.
///
/// Holds no per-request state; clones share the same backend.
#[derive(Clone)]
pub struct BlobRouter {
    store: Arc<dyn ObjectStore>,
    buckets: BucketPair,
}

impl std::fmt::Debug for BlobRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobRouter")
            .field("backend", &self.store.backend_name())
            .field("buckets", &self.buckets)
            .finish()
    }
}

impl BlobRouter {
    pub fn new(store: Arc<dyn ObjectStore>, buckets: BucketPair) -> Self {
        Self { store, buckets }
    }

    /// Build the configured backend and a router over it.
    pub async fn from_config(config: &AppConfig) -> RouterResult<Self> {
        config.validate()?;
        let store = depot_storage::from_config(&config.storage).await?;
        Ok(Self::new(store, config.buckets.pair()?))
    }

    pub fn buckets(&self) -> &BucketPair {
        &self.buckets
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn bucket_name(&self, bucket: Bucket) -> &str {
        self.buckets.name(bucket)
    }

    /// Create any missing managed bucket, optionally enabling native versioning.
    #[instrument(skip(self))]
    pub async fn ensure_buckets(&self, versioning: bool) -> RouterResult<()> {
        for bucket in Bucket::ALL {
            let name = self.bucket_name(bucket);
            if !self.store.bucket_exists(name).await? {
                self.store.make_bucket(name).await?;
                tracing::info!(bucket = %name, "Created bucket");
            }
            if versioning {
                self.store.enable_versioning(name).await?;
            }
        }
        Ok(())
    }

    /// Write a blob into the caller's primary bucket, then apply tags if given.
    #[instrument(
        skip(self, caller, request),
        fields(user = %caller.username, role = %caller.role)
    )]
    pub async fn upload(
        &self,
        caller: &CallerIdentity,
        name: &str,
        request: UploadRequest,
    ) -> RouterResult<StoredBlob> {
        let bucket = VisibilityPolicy::for_role(caller.role).primary();
        let bucket_name = self.bucket_name(bucket);
        let content_type = content_type_or_default(request.content_type.as_deref()).to_string();
        let metadata = BlobMetadata::for_upload(
            caller,
            &content_type,
            request.extra,
            OffsetDateTime::now_utc(),
        );

        let outcome = self
            .store
            .put(
                bucket_name,
                name,
                request.body,
                &content_type,
                &metadata.to_user_metadata(),
            )
            .await?;

        if let Some(tag_list) = &request.tags {
            self.store
                .set_tags(bucket_name, name, &tags::encode(tag_list))
                .await?;
        }

        tracing::info!(
            bucket = %bucket,
            size = outcome.size,
            version_id = outcome.version_id.as_deref().unwrap_or("-"),
            "Uploaded blob"
        );

        Ok(StoredBlob {
            name: name.to_string(),
            bucket,
            size: outcome.size,
            version_id: outcome.version_id,
        })
    }

    /// Stream the current content of a blob from the first bucket that has it.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn download(&self, caller: &CallerIdentity, name: &str) -> RouterResult<Download> {
        self.download_inner(caller, name, None).await
    }

    /// Stream a specific version of a blob. Buckets lacking the version are skipped.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn download_version(
        &self,
        caller: &CallerIdentity,
        name: &str,
        version_id: &str,
    ) -> RouterResult<Download> {
        self.download_inner(caller, name, Some(version_id)).await
    }

    async fn download_inner(
        &self,
        caller: &CallerIdentity,
        name: &str,
        version_id: Option<&str>,
    ) -> RouterResult<Download> {
        let order = VisibilityPolicy::for_role(caller.role).search_order();
        let (bucket, output) = first_success(&order, name, "download", move |bucket| {
            self.store.get(self.bucket_name(bucket), name, version_id)
        })
        .await
        .ok_or_else(|| RouterError::not_found(name))?;

        Ok(Download {
            bucket,
            meta: output.meta,
            body: output.body,
        })
    }

    /// Whether any bucket visible to the caller holds the blob.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn exists(&self, caller: &CallerIdentity, name: &str) -> bool {
        let order = VisibilityPolicy::for_role(caller.role).search_order();
        first_success(&order, name, "exists", move |bucket| {
            self.store.stat(self.bucket_name(bucket), name)
        })
        .await
        .is_some()
    }

    /// Remove a blob from every managed bucket, whatever the caller's role.
    ///
    /// Succeeds when at least one removal succeeded.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn delete(&self, caller: &CallerIdentity, name: &str) -> RouterResult<()> {
        let targets = VisibilityPolicy::for_role(caller.role).delete_targets();
        let mut removed = false;
        let mut first_error: Option<StorageError> = None;

        for bucket in targets {
            match self.store.remove(self.bucket_name(bucket), name).await {
                Ok(()) => removed = true,
                Err(err) => {
                    tracing::warn!(bucket = %bucket, error = %err, "Failed to remove blob");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if !removed => Err(RouterError::Backend(err)),
            _ => Ok(()),
        }
    }

    /// Names of every blob visible to the caller, without duplicates.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn list(&self, caller: &CallerIdentity) -> Vec<String> {
        self.visible_names(caller)
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Every visible blob with its attributes. Blobs whose stat fails are omitted.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn list_with_metadata(&self, caller: &CallerIdentity) -> Vec<BlobInfo> {
        let mut blobs = Vec::new();
        for (name, bucket) in self.visible_names(caller).await {
            match self.store.stat(self.bucket_name(bucket), &name).await {
                Ok(meta) => blobs.push(BlobInfo::new(name, bucket, &meta)),
                Err(err) => {
                    tracing::debug!(
                        bucket = %bucket,
                        key = %name,
                        error = %err,
                        "Skipping blob whose stat failed"
                    );
                }
            }
        }
        blobs
    }

    /// Union of names across the caller's search order, first sighting wins.
    async fn visible_names(&self, caller: &CallerIdentity) -> Vec<(String, Bucket)> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for bucket in VisibilityPolicy::for_role(caller.role).search_order() {
            let mut entries = self
                .store
                .list_objects(self.bucket_name(bucket), "", ListMode::Latest);
            while let Some(entry) = entries.next().await {
                match entry {
                    Ok(entry) => {
                        if seen.insert(entry.name.clone()) {
                            names.push((entry.name, bucket));
                        }
                    }
                    Err(err) => {
                        tracing::debug!(
                            bucket = %bucket,
                            error = %err,
                            "Listing failed, continuing with next bucket"
                        );
                        break;
                    }
                }
            }
        }

        names
    }

    /// Tags of a blob from the first bucket with a readable tag set.
    ///
    /// An empty tag set still counts as readable. A blob absent everywhere has no tags.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn get_tags(&self, caller: &CallerIdentity, name: &str) -> Vec<String> {
        let order = VisibilityPolicy::for_role(caller.role).search_order();
        first_success(&order, name, "get_tags", move |bucket| {
            self.store.get_tags(self.bucket_name(bucket), name)
        })
        .await
        .map(|(_, map)| tags::decode(&map))
        .unwrap_or_default()
    }

    /// Replace a blob's tags in the caller's primary bucket.
    ///
    /// A blob missing from that bucket is a rejected write, not a miss.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn set_tags(
        &self,
        caller: &CallerIdentity,
        name: &str,
        tag_list: &[String],
    ) -> RouterResult<()> {
        let bucket = VisibilityPolicy::for_role(caller.role).primary();
        self.store
            .set_tags(self.bucket_name(bucket), name, &tags::encode(tag_list))
            .await?;
        Ok(())
    }

    /// Clear a blob's tags in the caller's primary bucket.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn delete_tags(&self, caller: &CallerIdentity, name: &str) -> RouterResult<()> {
        let empty: [&str; 0] = [];
        let bucket = VisibilityPolicy::for_role(caller.role).primary();
        self.store
            .set_tags(self.bucket_name(bucket), name, &tags::encode(&empty))
            .await?;
        Ok(())
    }

    /// Version history of a blob, newest first.
    ///
    /// Histories are never merged: the first bucket holding a live version of
    /// the exact name supplies the whole list. A bucket whose history ends in a
    /// delete marker is skipped.
    #[instrument(skip(self, caller), fields(user = %caller.username, role = %caller.role))]
    pub async fn list_versions(&self, caller: &CallerIdentity, name: &str) -> Vec<VersionInfo> {
        let order = VisibilityPolicy::for_role(caller.role).search_order();
        first_success(&order, name, "list_versions", move |bucket| {
            self.versions_in(bucket, name)
        })
        .await
        .map(|(_, versions)| versions)
        .unwrap_or_default()
    }

    async fn versions_in(&self, bucket: Bucket, name: &str) -> Result<Vec<VersionInfo>, StorageError> {
        let mut entries =
            self.store
                .list_objects(self.bucket_name(bucket), name, ListMode::AllVersions);
        let mut versions = Vec::new();
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            // The listing is a prefix match; keep only this exact name.
            if entry.name == name {
                versions.push(VersionInfo::from(entry));
            }
        }

        // No current version means the history ends in a delete marker.
        if !versions.iter().any(|v| v.is_latest) {
            return Err(StorageError::NotFound(name.to_string()));
        }

        // Backend listing order is not guaranteed to be chronological.
        versions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(versions)
    }
}
