//! Content-addressable blob layer.
//!
//! Payloads are stored once under a key derived from their content hash:
//! `blobs/<algorithm>/<hex[0..2]>/<hex>`. A save streams the payload a
//! single time, hashing it and capturing the first bytes for MIME sniffing
//! while spooling it to a temporary object. The temporary object is then
//! promoted to its content key, or dropped if that key is already taken.

use crate::error::{StorageError, StorageResult};
use crate::sniff::sniff_mime_type;
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use strata_core::config::HashingConfig;
use strata_core::{BlobMeta, ContentHash, HashAlgorithm, NewBlob};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix for temporary uploads.
const TMP_PREFIX: &str = "tmp";

/// Prefix for content-addressed blobs.
const BLOB_PREFIX: &str = "blobs";

/// Result of [`BlobStore::save`].
#[derive(Clone, Debug)]
pub struct SavedBlob {
    pub meta: BlobMeta,
    /// First bytes of the payload, up to the configured header size.
    pub header: Bytes,
    /// Whether identical content was already stored.
    pub deduplicated: bool,
}

/// Content-addressable store on top of an [`ObjectStore`].
#[derive(Clone)]
pub struct BlobStore {
    objects: Arc<dyn ObjectStore>,
    algorithm: HashAlgorithm,
    header_bytes: usize,
}

impl BlobStore {
    pub fn new(objects: Arc<dyn ObjectStore>, algorithm: HashAlgorithm, header_bytes: usize) -> Self {
        Self {
            objects,
            algorithm,
            header_bytes,
        }
    }

    pub fn from_config(objects: Arc<dyn ObjectStore>, config: &HashingConfig) -> Self {
        Self::new(objects, config.algorithm, config.header_bytes)
    }

    /// Algorithm used for new payloads.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Object key for a content hash.
    pub fn key_for(hash: &ContentHash) -> String {
        let hex = hash.to_hex();
        format!("{BLOB_PREFIX}/{}/{}/{hex}", hash.algorithm(), &hex[..2])
    }

    /// Store a payload, returning its descriptor.
    ///
    /// A blank `name` falls back to the hex digest and a blank `mime_type`
    /// is sniffed from the header.
    pub async fn save(&self, blob: NewBlob, content: ByteStream) -> StorageResult<SavedBlob> {
        let tmp_key = format!("{TMP_PREFIX}/{}", Uuid::new_v4());
        let mut upload = self.objects.put_stream(&tmp_key).await?;

        let spooled = match self.spool(&mut upload, content).await {
            Ok(spooled) => spooled,
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    warn!(key = %tmp_key, error = %abort_err, "failed to abort temporary upload");
                }
                return Err(e);
            }
        };
        let (hash, header) = spooled;

        let size = upload.finish().await?;
        let key = Self::key_for(&hash);
        let created = self.objects.rename_if_absent(&tmp_key, &key).await?;
        debug!(
            hash = %hash,
            size,
            deduplicated = !created,
            backend = self.objects.backend_name(),
            "stored blob"
        );

        let mime_type = if blob.mime_type.trim().is_empty() {
            sniff_mime_type(&header).to_string()
        } else {
            blob.mime_type
        };
        let name = if blob.name.trim().is_empty() {
            hash.to_hex()
        } else {
            blob.name
        };

        Ok(SavedBlob {
            meta: BlobMeta {
                hash,
                name,
                mime_type,
                size,
            },
            header,
            deduplicated: !created,
        })
    }

    async fn spool(
        &self,
        upload: &mut Box<dyn StreamingUpload>,
        mut content: ByteStream,
    ) -> StorageResult<(ContentHash, Bytes)> {
        let mut hasher = self.algorithm.hasher();
        let mut header = BytesMut::with_capacity(self.header_bytes);

        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|e| match e {
                StorageError::Payload(_) => e,
                other => StorageError::Payload(other.to_string()),
            })?;
            if chunk.is_empty() {
                continue;
            }
            hasher.update(&chunk);
            if header.len() < self.header_bytes {
                let take = (self.header_bytes - header.len()).min(chunk.len());
                header.extend_from_slice(&chunk[..take]);
            }
            upload.write(chunk).await?;
        }

        Ok((hasher.finalize(), header.freeze()))
    }

    /// Stream a payload by hash. `None` if nothing is stored under it.
    pub async fn retrieve(&self, hash: &ContentHash) -> StorageResult<Option<ByteStream>> {
        match self.objects.get_stream(&Self::key_for(hash)).await {
            Ok(stream) => Ok(Some(stream)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read a whole payload into memory. Meant for small payloads.
    pub async fn read_all(&self, hash: &ContentHash) -> StorageResult<Option<Bytes>> {
        match self.objects.get(&Self::key_for(hash)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, hash: &ContentHash) -> StorageResult<bool> {
        self.objects.exists(&Self::key_for(hash)).await
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.objects.health_check().await
    }
}

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Stream a local file as a [`ByteStream`] in fixed-size chunks.
pub async fn file_stream(path: impl AsRef<std::path::Path>) -> StorageResult<ByteStream> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    Ok(crate::backends::filesystem::chunked(file))
}
