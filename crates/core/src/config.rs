//! Configuration types shared across crates.

use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for blobs and temporary uploads.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty 'path'".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds a statement waits on a database locked by another process.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer STRATA_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres 'max_connections' must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Content hashing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Algorithm for content hashes. Changing it on a populated store makes
    /// old and new payloads of the same bytes distinct blobs.
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    /// Bytes captured from the start of each payload for type sniffing.
    #[serde(default = "default_header_bytes")]
    pub header_bytes: usize,
}

fn default_header_bytes() -> usize {
    8 * 1024
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            header_bytes: default_header_bytes(),
        }
    }
}

/// Subtree locking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockingConfig {
    /// When false the store runs in degraded (unfenced) mode.
    #[serde(default = "default_locking_enabled")]
    pub enabled: bool,
    /// Lease duration for each lock group in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Attempts made by `try_acquire_lock` before giving up.
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
    /// Base delay between acquisition attempts in milliseconds.
    #[serde(default = "default_acquire_delay_ms")]
    pub acquire_delay_ms: u64,
    /// Upper bound for the delay between acquisition attempts.
    #[serde(default = "default_max_acquire_delay_ms")]
    pub max_acquire_delay_ms: u64,
    /// Owner recorded on lock rows. A random id is generated when unset.
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_locking_enabled() -> bool {
    true
}

fn default_lease_secs() -> u64 {
    30
}

fn default_acquire_attempts() -> u32 {
    5
}

fn default_acquire_delay_ms() -> u64 {
    25
}

fn default_max_acquire_delay_ms() -> u64 {
    250
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            enabled: default_locking_enabled(),
            lease_secs: default_lease_secs(),
            acquire_attempts: default_acquire_attempts(),
            acquire_delay_ms: default_acquire_delay_ms(),
            max_acquire_delay_ms: default_max_acquire_delay_ms(),
            owner_id: None,
        }
    }
}

impl LockingConfig {
    pub fn lease(&self) -> time::Duration {
        let secs = i64::try_from(self.lease_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    pub fn acquire_delay(&self) -> Duration {
        Duration::from_millis(self.acquire_delay_ms)
    }

    pub fn max_acquire_delay(&self) -> Duration {
        Duration::from_millis(self.max_acquire_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lease_secs == 0 {
            return Err("locking 'lease_secs' must be greater than 0".to_string());
        }
        if self.acquire_attempts == 0 {
            return Err("locking 'acquire_attempts' must be at least 1".to_string());
        }
        if self.max_acquire_delay_ms < self.acquire_delay_ms {
            return Err(
                "locking 'max_acquire_delay_ms' must not be below 'acquire_delay_ms'".to_string(),
            );
        }
        Ok(())
    }
}

/// Retry policy for fenced HEAD publication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_publish_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to each backoff.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    20
}

fn default_max_delay_ms() -> u64 {
    200
}

fn default_jitter_ms() -> u64 {
    10
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_publish_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl PublishConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("publish 'max_attempts' must be at least 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("publish 'max_delay_ms' must not be below 'base_delay_ms'".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub locking: LockingConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

impl AppConfig {
    /// Validate every section, reporting the first failure.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage
            .validate()
            .and_then(|_| self.metadata.validate())
            .and_then(|_| self.locking.validate())
            .and_then(|_| self.publish.validate())
            .map_err(crate::Error::Config)
    }

    /// Test configuration rooted at `dir`: SQLite metadata and filesystem blobs.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            storage: StorageConfig::Filesystem {
                path: dir.join("blobs"),
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("metadata.db"),
                query_timeout_secs: None,
            },
            hashing: HashingConfig::default(),
            locking: LockingConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}
