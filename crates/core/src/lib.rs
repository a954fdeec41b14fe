//! Core domain types for the depot blob routing layer.
//!
//! This crate defines the data model shared by the storage, router and CLI crates:
//! - Caller roles and identities
//! - The working/stable bucket pair and per-role bucket visibility
//! - The flat tag map codec used to store ordered tag lists
//! - Configuration types

pub mod bucket;
pub mod config;
pub mod error;
pub mod role;
pub mod tags;
pub mod visibility;

pub use bucket::{Bucket, BucketPair};
pub use error::{Error, Result};
pub use role::{CallerIdentity, Role};
pub use tags::TagMap;
pub use visibility::VisibilityPolicy;
