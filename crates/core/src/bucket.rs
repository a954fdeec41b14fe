//! The working/stable bucket pair.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two partitions this system manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Mutable staging area.
    Working,
    /// Reviewed, released area.
    Stable,
}

impl Bucket {
    /// Every managed bucket.
    pub const ALL: [Bucket; 2] = [Bucket::Working, Bucket::Stable];

    /// Suffix appended to the configured base name.
    pub fn suffix(self) -> &'static str {
        match self {
            Bucket::Working => "-working",
            Bucket::Stable => "-stable",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Working => "working",
            Bucket::Stable => "stable",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete backend bucket names derived from one base name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketPair {
    working: String,
    stable: String,
}

impl BucketPair {
    /// Derive both bucket names from `base`.
    ///
    /// The derived names must satisfy S3 bucket naming rules.
    pub fn from_base(base: &str) -> Result<Self> {
        let pair = Self {
            working: format!("{base}{}", Bucket::Working.suffix()),
            stable: format!("{base}{}", Bucket::Stable.suffix()),
        };
        validate_bucket_name(&pair.working)?;
        validate_bucket_name(&pair.stable)?;
        Ok(pair)
    }

    /// Backend name of `bucket`.
    pub fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Working => &self.working,
            Bucket::Stable => &self.stable,
        }
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    if !(3..=63).contains(&name.len()) {
        return Err(Error::InvalidBucketName(format!(
            "{name}: length must be between 3 and 63"
        )));
    }
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
    if !valid_chars {
        return Err(Error::InvalidBucketName(format!(
            "{name}: only lowercase letters, digits, '-' and '.' are allowed"
        )));
    }
    let first = name.as_bytes()[0];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(Error::InvalidBucketName(format!(
            "{name}: must start with a letter or digit"
        )));
    }
    if name.contains("..") {
        return Err(Error::InvalidBucketName(format!(
            "{name}: must not contain consecutive dots"
        )));
    }
    Ok(())
}
