//! Metadata store error types.

use thiserror::Error;

/// PostgreSQL SQLSTATEs that indicate a transient conflict:
/// serialization failure, deadlock detected, lock not available.
const RETRYABLE_SQLSTATES: &[&str] = &["40001", "40P01", "55P03"];

/// SQLite result codes for a busy or locked database, including the
/// extended codes sqlx reports (BUSY_RECOVERY, BUSY_SNAPSHOT, LOCKED_SHAREDCACHE).
const RETRYABLE_SQLITE_CODES: &[&str] = &["5", "6", "261", "517", "262"];

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// HEAD compare-and-swap affected no rows.
    #[error("stale fence token {fence_token:?} for inode {inode_id}")]
    StaleFence {
        inode_id: i64,
        fence_token: Option<i64>,
    },

    #[error("lock conflict on scope key {scope_key}")]
    LockConflict { scope_key: String },

    /// A non-root inode without its path-segment projection.
    #[error("path projection missing for inode {0}")]
    ProjectionMissing(i64),
}

impl MetadataError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            MetadataError::StaleFence { .. } => true,
            MetadataError::Database(err) => is_transient(err),
            _ => false,
        }
    }
}

/// Classify a database error code as transient.
pub fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_SQLSTATES.contains(&code) || RETRYABLE_SQLITE_CODES.contains(&code)
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref().is_some_and(is_retryable_code),
        _ => false,
    }
}

/// Whether the error is a unique constraint violation on either backend.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            // PostgreSQL error code 23505 = unique_violation
            db_err.is_unique_violation() || db_err.code().as_deref() == Some("23505")
        }
        _ => false,
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
