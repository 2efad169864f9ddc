//! Metadata store abstraction and implementations for Strata.
//!
//! This crate provides the relational data model behind the path store:
//! - Inodes, directory entries and path projections
//! - The append-only version ledger
//! - Fenced HEAD pointers and transaction outcomes
//! - Subtree lock groups and fence token allocation

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult, is_retryable_code};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use strata_core::config::MetadataConfig;
use std::sync::Arc;

/// Open the configured metadata backend and bring its schema up to date.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    let store: Arc<dyn MetadataStore> = match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => Arc::new(SqliteStore::new(path, *query_timeout_secs).await?),
        MetadataConfig::Postgres {
            url: Some(url),
            max_connections,
            statement_timeout_ms,
            ..
        } => {
            tracing::info!("connecting to PostgreSQL by URL");
            Arc::new(PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?)
        }
        MetadataConfig::Postgres {
            url: None,
            host: Some(host),
            database: Some(database),
            port,
            username,
            password,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => Arc::new(
            PostgresStore::from_params(
                host,
                port.unwrap_or(5432),
                username.as_deref(),
                password.as_deref(),
                database,
                *ssl_mode,
                *max_connections,
                *statement_timeout_ms,
            )
            .await?,
        ),
        MetadataConfig::Postgres { .. } => {
            return Err(MetadataError::Config(
                "postgres needs either 'url' or 'host' and 'database'".to_string(),
            ));
        }
    };
    Ok(store)
}
