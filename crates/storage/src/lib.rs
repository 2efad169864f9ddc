//! Object storage and the content-addressable blob layer for Strata.
//!
//! This crate provides:
//! - A minimal object store abstraction with streaming writes and
//!   no-clobber promotion
//! - A local filesystem backend
//! - [`BlobStore`], which keys immutable payloads by content hash

pub mod backends;
pub mod blob;
pub mod error;
pub mod sniff;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use blob::{BlobStore, SavedBlob, bytes_stream, file_stream};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectStore, StreamingUpload};

use std::sync::Arc;
use strata_core::config::{HashingConfig, StorageConfig};

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Create a blob store from storage and hashing configuration.
pub async fn blob_store_from_config(
    storage: &StorageConfig,
    hashing: &HashingConfig,
) -> StorageResult<BlobStore> {
    let objects = from_config(storage).await?;
    Ok(BlobStore::from_config(objects, hashing))
}
