//! Router error types.

use depot_storage::StorageError;
use thiserror::Error;

/// Blob router errors.
///
/// `NotFound` is an expected outcome (the blob is absent from every bucket the
/// caller may search); everything else is an operational failure.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("blob not found: {name}")]
    NotFound { name: String },

    #[error("backend failure: {0}")]
    Backend(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] depot_core::Error),
}

impl RouterError {
    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for router operations.
pub type RouterResult<T> = std::result::Result<T, RouterError>;
