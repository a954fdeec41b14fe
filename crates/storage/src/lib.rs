//! Object storage abstraction and backends for depot.
//!
//! This crate provides:
//! - A bucket-addressed object store trait covering streaming puts and reads,
//!   stat, removal, plain and versioned listings, and object tagging
//! - Backends: S3-compatible and in-memory

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{
    ByteStream, DEFAULT_CONTENT_TYPE, GetOutput, ListMode, ObjectEntry, ObjectMeta, ObjectStore,
    ObjectStream, PutOutcome, UserMetadata, bytes_stream, collect_bytes,
};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        StorageConfig::S3 {
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
