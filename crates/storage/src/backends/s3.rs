//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, GetOutput, ListMode, ObjectEntry, ObjectMeta, ObjectStore, ObjectStream,
    PutOutcome, UserMetadata,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::DateTime as AwsDateTime;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CompletedMultipartUpload, CompletedPart,
    CreateBucketConfiguration, Tag, Tagging, VersioningConfiguration,
};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use depot_core::TagMap;
use depot_core::tags::TAG_KEY_PREFIX;
use futures::StreamExt;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Region assumed when none is configured.
const DEFAULT_REGION: &str = "us-east-1";

/// Marker included in lazy-credentials initialization errors so we can map them
/// to actionable storage config errors instead of generic S3 transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "depot-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "depot-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects (notably TLS/native-root initialization)
/// in environments where no root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(err, aws_sdk_s3::error::SdkError::ServiceError(service_err)
        if service_err.raw().status().as_u16() == 404)
}

/// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if is_not_found(&err) {
        return StorageError::NotFound(key.to_string());
    }
    map_s3_operation_error(err)
}

fn to_offset_datetime(dt: &AwsDateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
        .inspect_err(|e| {
            tracing::warn!(
                timestamp = dt.secs(),
                error = %e,
                "Failed to convert S3 timestamp"
            );
        })
        .ok()
}

fn to_size(len: Option<i64>) -> u64 {
    len.and_then(|l| u64::try_from(l).ok()).unwrap_or(0)
}

/// Sort key restoring list order of a tag set S3 returns unordered.
///
/// `tag-<N>` keys come first by index; any other key follows, by name.
fn tag_order(key: &str) -> (u8, u64, &str) {
    match key
        .strip_prefix(TAG_KEY_PREFIX)
        .and_then(|index| index.parse::<u64>().ok())
    {
        Some(index) => (0, index, key),
        None => (1, 0, key),
    }
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    /// Normalized endpoint, or the canonical AWS endpoint for the region.
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO and some
    ///   S3-compatible services.
    pub async fn new(
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "depot-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        let normalized_endpoint = endpoint.as_deref().map(normalize_endpoint);

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // For explicit HTTP endpoints (e.g. local MinIO), use an HTTP-only client
            // so SDK initialization doesn't depend on native trust roots.
            if endpoint_url.starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let endpoint = normalized_endpoint
            .unwrap_or_else(|| format!("s3.{}.amazonaws.com", resolved_region));

        Ok(Self {
            client,
            endpoint,
            region: resolved_region,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn put_small(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<PutOutcome> {
        let size = data.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(PutOutcome {
            size,
            version_id: output.version_id().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
        })
    }
}

/// Prepend `http://` to bare `host:port` endpoints.
fn normalize_endpoint(endpoint_url: &str) -> String {
    let endpoint_lower = endpoint_url.to_ascii_lowercase();
    if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
        endpoint_url.to_string()
    } else {
        format!("http://{}", endpoint_url)
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self, body, metadata), fields(backend = "s3"))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> StorageResult<PutOutcome> {
        let metadata: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Buffer up to one part; small objects go out as a single PutObject.
        let mut buffer = Vec::with_capacity(MIN_PART_SIZE);
        while buffer.len() < MIN_PART_SIZE {
            match body.next().await {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => {
                    return self
                        .put_small(bucket, key, Bytes::from(buffer), content_type, metadata)
                        .await;
                }
            }
        }

        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        let mut upload = S3Upload {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            bytes_written: 0,
            buffer,
        };

        match upload.drain(&mut body).await {
            Ok(()) => upload.finish().await,
            Err(err) => {
                upload.abort().await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<GetOutput> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let meta = ObjectMeta {
            size: to_size(output.content_length()),
            last_modified: output.last_modified().and_then(to_offset_datetime),
            etag: output.e_tag().map(str::to_string),
            content_type: output.content_type().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            metadata: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        };

        // Convert AWS ByteStream to AsyncRead, then wrap with ReaderStream for true streaming
        let reader_stream = ReaderStream::new(output.body.into_async_read());
        let body = reader_stream.map(|result| result.map_err(StorageError::Io));

        Ok(GetOutput {
            meta,
            body: Box::pin(body),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        Ok(ObjectMeta {
            size: to_size(output.content_length()),
            last_modified: output.last_modified().and_then(to_offset_datetime),
            etag: output.e_tag().map(str::to_string),
            content_type: output.content_type().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            metadata: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds for absent keys; with versioning it adds a delete marker.
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str, mode: ListMode) -> ObjectStream {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        match mode {
            ListMode::Latest => Box::pin(async_stream::try_stream! {
                let mut continuation_token: Option<String> = None;

                loop {
                    let output = client
                        .list_objects_v2()
                        .bucket(&bucket)
                        .prefix(&prefix)
                        .set_continuation_token(continuation_token.take())
                        .send()
                        .await
                        .map_err(|e| map_sdk_error(e, &bucket))?;

                    for obj in output.contents() {
                        if let Some(name) = obj.key() {
                            yield ObjectEntry {
                                name: name.to_string(),
                                size: to_size(obj.size()),
                                last_modified: obj.last_modified().and_then(to_offset_datetime),
                                etag: obj.e_tag().map(str::to_string),
                                version_id: None,
                                is_latest: true,
                            };
                        }
                    }

                    if output.is_truncated() == Some(true) {
                        continuation_token = output.next_continuation_token().map(str::to_string);
                    } else {
                        break;
                    }
                }
            }),
            ListMode::AllVersions => Box::pin(async_stream::try_stream! {
                let mut key_marker: Option<String> = None;
                let mut version_marker: Option<String> = None;

                loop {
                    let output = client
                        .list_object_versions()
                        .bucket(&bucket)
                        .prefix(&prefix)
                        .set_key_marker(key_marker.take())
                        .set_version_id_marker(version_marker.take())
                        .send()
                        .await
                        .map_err(|e| map_sdk_error(e, &bucket))?;

                    // Delete markers are not yielded; a key whose latest entry is a
                    // marker shows up with no version flagged latest.
                    for version in output.versions() {
                        if let Some(name) = version.key() {
                            yield ObjectEntry {
                                name: name.to_string(),
                                size: to_size(version.size()),
                                last_modified: version.last_modified().and_then(to_offset_datetime),
                                etag: version.e_tag().map(str::to_string),
                                version_id: version.version_id().map(str::to_string),
                                is_latest: version.is_latest() == Some(true),
                            };
                        }
                    }

                    if output.is_truncated() == Some(true) {
                        key_marker = output.next_key_marker().map(str::to_string);
                        version_marker = output.next_version_id_marker().map(str::to_string);
                    } else {
                        break;
                    }
                }
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagMap> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let mut pairs: Vec<_> = output
            .tag_set()
            .iter()
            .map(|tag| (tag.key(), tag.value()))
            .collect();
        pairs.sort_by(|(a, _), (b, _)| tag_order(a).cmp(&tag_order(b)));
        Ok(TagMap::from_pairs(pairs))
    }

    #[instrument(skip(self, tags), fields(backend = "s3", count = tags.len()))]
    async fn set_tags(&self, bucket: &str, key: &str, tags: &TagMap) -> StorageResult<()> {
        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::InvalidTag(e.to_string()))?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| StorageError::InvalidTag(e.to_string()))?;

        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(map_s3_operation_error(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request.send().await.map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn enable_versioning(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(
                VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Streaming upload for S3 backend using multipart upload.
///
/// Buffers incoming data to meet S3's 5 MB minimum part size requirement.
/// Nothing becomes visible until the upload is completed.
struct S3Upload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    bytes_written: u64,
    buffer: Vec<u8>,
}

impl S3Upload {
    /// Upload a single part to S3 and track it.
    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| StorageError::Config("too many multipart parts".to_string()))?;
        let size = data.len() as u64;

        let upload_output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(upload_output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        self.bytes_written += size;

        Ok(())
    }

    /// Read the rest of `body`, uploading a part each time a full one is buffered.
    async fn drain(&mut self, body: &mut ByteStream) -> StorageResult<()> {
        loop {
            while self.buffer.len() >= MIN_PART_SIZE {
                let part: Vec<u8> = self.buffer.drain(..MIN_PART_SIZE).collect();
                self.upload_part(Bytes::from(part)).await?;
            }
            match body.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => return Ok(()),
            }
        }
    }

    async fn finish(mut self) -> StorageResult<PutOutcome> {
        // The last part may be smaller than MIN_PART_SIZE.
        if !self.buffer.is_empty() {
            let remaining = std::mem::take(&mut self.buffer);
            self.upload_part(Bytes::from(remaining)).await?;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts.clone()))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(PutOutcome {
            size: self.bytes_written,
            version_id: output.version_id().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
        })
    }

    /// Abort the multipart upload (best effort).
    async fn abort(self) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}
