//! Common test utilities for the version store.

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use strata_core::config::{AppConfig, HashingConfig, LockingConfig};
use strata_core::{HashAlgorithm, NormalizedPath};
use strata_metadata::{MetadataResult, MetadataStore, PostgresStore};
use strata_storage::{BlobStore, ByteStream, FilesystemBackend, bytes_stream};
use strata_store::{LockingService, RetryPolicy, VersionStore};
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for container startup failures, used to decide on skipping.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A SQLite-backed store in a temporary directory.
#[allow(dead_code)]
pub struct TestStore {
    pub store: VersionStore,
    pub config: AppConfig,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Store with locking enabled, hashing with SHA-256.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Store without a locking service (unfenced HEAD moves).
    #[allow(dead_code)]
    pub async fn degraded() -> Self {
        Self::with_config(|config| config.locking.enabled = false).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        config.hashing = HashingConfig {
            algorithm: HashAlgorithm::Sha256,
            ..HashingConfig::default()
        };
        config.locking = LockingConfig {
            acquire_delay_ms: 5,
            max_acquire_delay_ms: 20,
            ..LockingConfig::default()
        };
        tweak(&mut config);

        let store = VersionStore::from_config(&config)
            .await
            .expect("Failed to build version store");
        Self {
            store,
            config,
            _temp_dir: temp_dir,
        }
    }
}

/// A PostgreSQL-backed store on a testcontainer, blobs in a temp directory.
#[allow(dead_code)]
pub struct PostgresTestStore {
    pub store: VersionStore,
    pub metadata: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
    _temp_dir: TempDir,
}

impl PostgresTestStore {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                strata_metadata::MetadataError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
        let metadata = Arc::new(PostgresStore::new(&url, 10, None).await?);

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path())
            .await
            .expect("Failed to create blob root");
        let blobs = BlobStore::new(Arc::new(backend), HashAlgorithm::Sha256, 8 * 1024);

        let shared: Arc<dyn MetadataStore> = metadata.clone();
        let locking = LockingService::new(
            shared.clone(),
            &LockingConfig {
                acquire_attempts: 50,
                acquire_delay_ms: 5,
                max_acquire_delay_ms: 50,
                ..LockingConfig::default()
            },
        );
        let store = VersionStore::new(
            shared,
            blobs,
            Some(Arc::new(locking)),
            RetryPolicy::default(),
        );
        store
            .namespace()
            .ensure_root()
            .await
            .map_err(|e| strata_metadata::MetadataError::Internal(e.to_string()))?;

        Ok(Self {
            store,
            metadata,
            _container: container,
            _temp_dir: temp_dir,
        })
    }
}

/// Try to start a PostgreSQL store, skipping when Docker is unavailable or
/// SKIP_POSTGRES_TESTS is set.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PostgresTestStore> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestStore::new().await {
        Ok(store) => Some(store),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}

#[allow(dead_code)]
pub fn path(s: &str) -> NormalizedPath {
    NormalizedPath::parse(s).unwrap()
}

#[allow(dead_code)]
pub fn content(data: &'static [u8]) -> ByteStream {
    bytes_stream(Bytes::from_static(data))
}

/// Drain a content stream.
#[allow(dead_code)]
pub async fn collect(stream: Option<ByteStream>) -> Option<Bytes> {
    let mut stream = stream?;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    Some(Bytes::from(out))
}
