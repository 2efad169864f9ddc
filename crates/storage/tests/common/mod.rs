pub mod fixtures;
pub mod memory;

#[allow(unused_imports)]
pub use fixtures::{blob_store, seeded_bytes, seeded_stream};
#[allow(unused_imports)]
pub use memory::{format_memory_size, process_rss};
