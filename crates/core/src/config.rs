//! Configuration types shared across crates.

use crate::bucket::BucketPair;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub buckets: BucketConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.buckets.validate()?;
        self.storage.validate().map_err(Error::Config)
    }
}

/// Bucket naming and provisioning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Base name; the managed buckets are `<base>-working` and `<base>-stable`.
    #[serde(default = "default_base_name")]
    pub base_name: String,
    /// Enable native object versioning when provisioning buckets (default: true).
    #[serde(default = "default_true")]
    pub versioning: bool,
    /// Create missing buckets at startup (default: true).
    #[serde(default = "default_true")]
    pub auto_create: bool,
}

fn default_base_name() -> String {
    "depot".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            base_name: default_base_name(),
            versioning: true,
            auto_create: true,
        }
    }
}

impl BucketConfig {
    /// Resolve the concrete bucket names.
    pub fn pair(&self) -> Result<BucketPair> {
        BucketPair::from_base(&self.base_name)
    }

    pub fn validate(&self) -> Result<()> {
        self.pair().map(|_| ())
    }
}

/// Object store backend configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process store. Contents live only as long as the process.
    #[default]
    Memory,
    /// S3-compatible storage (AWS S3, MinIO, ...).
    S3 {
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Access key ID. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to the ambient AWS credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            StorageConfig::Memory => Ok(()),
        }
    }
}
