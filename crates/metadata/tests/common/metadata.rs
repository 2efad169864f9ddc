//! Backends under test: a SQLite file in a temp directory, and PostgreSQL in
//! a throwaway container.

use std::future::Future;
use std::sync::Arc;
use strata_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Marks container startup failures, which skip rather than fail a test.
pub const CONTAINER_START_MARKER: &str = "postgres-container-start:";

async fn sqlite() -> (Arc<dyn MetadataStore>, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = SqliteStore::new(&dir.path().join("ledger.db"), None)
        .await
        .expect("Failed to open SQLite metadata");
    (Arc::new(store), dir)
}

/// PostgreSQL store kept alive together with its container.
#[allow(dead_code)]
pub struct PgMetadata {
    store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PgMetadata {
    async fn start() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| MetadataError::Internal(format!("{CONTAINER_START_MARKER} {e}")))?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");
        let host = container.get_host().await.expect("Failed to get host");

        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::new(&url, 5, None).await?;
        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Raw pool for assertions the repository traits do not expose.
    pub fn pool(&self) -> &sqlx::PgPool {
        self.store.pool()
    }
}

/// Start PostgreSQL, or `None` when Docker is unavailable or
/// SKIP_POSTGRES_TESTS is set. Other setup failures panic.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PgMetadata> {
    if std::env::var_os("SKIP_POSTGRES_TESTS").is_some() {
        return None;
    }
    match PgMetadata::start().await {
        Ok(pg) => Some(pg),
        Err(err) if err.to_string().contains(CONTAINER_START_MARKER) => {
            eprintln!("Skipping PostgreSQL test (Docker unavailable): {err}");
            None
        }
        Err(err) => panic!("PostgreSQL test setup failed: {err}"),
    }
}

/// Run `test` on SQLite, then on PostgreSQL when a container can start.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut,
    Fut: Future<Output = ()>,
{
    let (store, _dir) = sqlite().await;
    test(store).await;

    if let Some(pg) = postgres_or_skip().await {
        test(pg.store()).await;
    }
}
