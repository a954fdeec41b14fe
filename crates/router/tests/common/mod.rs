pub mod flaky;

use bytes::Bytes;
use depot_core::{BucketPair, CallerIdentity, Role};
use depot_router::{BlobRouter, UploadRequest};
use depot_storage::{MemoryBackend, ObjectStore, bytes_stream, collect_bytes};
use std::sync::Arc;
use uuid::Uuid;

#[allow(unused_imports)]
pub use flaky::FlakyStore;

pub const BASE: &str = "depot-test";

pub fn caller(username: &str, role: Role) -> CallerIdentity {
    CallerIdentity::new(Uuid::new_v4(), username, role)
}

#[allow(dead_code)]
pub fn viewer() -> CallerIdentity {
    caller("victor", Role::Viewer)
}

#[allow(dead_code)]
pub fn contributor() -> CallerIdentity {
    caller("carol", Role::Contributor)
}

#[allow(dead_code)]
pub fn admin() -> CallerIdentity {
    caller("ada", Role::Admin)
}

pub fn pair() -> BucketPair {
    BucketPair::from_base(BASE).unwrap()
}

/// A router over a fresh in-memory backend with both buckets provisioned and versioned.
pub async fn memory_router() -> BlobRouter {
    router_over(Arc::new(MemoryBackend::new())).await
}

pub async fn router_over(store: Arc<dyn ObjectStore>) -> BlobRouter {
    let router = BlobRouter::new(store, pair());
    router.ensure_buckets(true).await.unwrap();
    router
}

#[allow(dead_code)]
pub fn body(data: &'static str) -> UploadRequest {
    UploadRequest::new(bytes_stream(Bytes::from_static(data.as_bytes())))
}

/// Upload `data` as `name` on behalf of `caller`.
#[allow(dead_code)]
pub async fn put(router: &BlobRouter, caller: &CallerIdentity, name: &str, data: &'static str) {
    router.upload(caller, name, body(data)).await.unwrap();
}

/// Download `name` and return its content as a string.
#[allow(dead_code)]
pub async fn read(router: &BlobRouter, caller: &CallerIdentity, name: &str) -> String {
    let download = router.download(caller, name).await.unwrap();
    let data = collect_bytes(download.body).await.unwrap();
    String::from_utf8(data.to_vec()).unwrap()
}
