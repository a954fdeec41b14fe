//! Role-aware blob routing across the working and stable buckets.
//!
//! The [`BlobRouter`] decides, per caller role, which bucket receives writes and
//! in which order buckets are searched for reads. Deletes always reach both
//! buckets. Tag lists are stored through the flat tag map codec in
//! [`depot_core::tags`].

pub mod error;
mod fallback;
pub mod models;
pub mod router;

pub use error::{RouterError, RouterResult};
pub use models::{BlobInfo, BlobMetadata, Download, StoredBlob, UploadRequest, VersionInfo};
pub use router::BlobRouter;
