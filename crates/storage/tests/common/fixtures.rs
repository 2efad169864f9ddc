use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use strata_core::HashAlgorithm;
use strata_storage::{BlobStore, ByteStream, FilesystemBackend, StorageResult};

/// Blob store over a filesystem backend rooted at `dir`.
pub async fn blob_store(dir: &Path, algorithm: HashAlgorithm) -> BlobStore {
    let backend = FilesystemBackend::new(dir).await.unwrap();
    BlobStore::new(Arc::new(backend), algorithm, 8 * 1024)
}

fn lcg_fill(state: &mut u64, buf: &mut [u8]) {
    for chunk in buf.chunks_mut(8) {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

/// Deterministic pseudo-random payload. Same seed, same bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    lcg_fill(&mut state, &mut data);
    Bytes::from(data)
}

/// The same payload as [`seeded_bytes`] with `chunk_len` a multiple of 8,
/// generated lazily so the whole payload is never in memory.
pub fn seeded_stream(seed: u64, len: usize, chunk_len: usize) -> ByteStream {
    assert_eq!(chunk_len % 8, 0, "chunk_len must be a multiple of 8");
    let stream = async_stream::stream! {
        let mut state = seed;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(chunk_len);
            let mut buf = vec![0u8; n];
            lcg_fill(&mut state, &mut buf);
            remaining -= n;
            yield StorageResult::Ok(Bytes::from(buf));
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }

    #[tokio::test]
    async fn test_seeded_stream_matches_seeded_bytes() {
        let mut stream = seeded_stream(7, 1001, 64);
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(Bytes::from(collected), seeded_bytes(7, 1001));
    }
}
