pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{chunked_stream, failing_stream, seeded_bytes};
