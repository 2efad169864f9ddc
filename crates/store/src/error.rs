//! Store error types.

use strata_metadata::MetadataError;
use strata_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the versioned store.
///
/// Caller-facing "not found", "already exists" and "deleted" outcomes are
/// not errors: operations return `Ok(None)` or an empty list for those.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("unable to acquire lock after {attempts} attempts")]
    LockUnavailable { attempts: u32 },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<StoreError>,
    },

    /// The store was built without a locking service.
    #[error("locking is disabled")]
    LockingDisabled,

    #[error("unknown or already decided transaction: {0}")]
    UnknownTransaction(String),

    /// A live version references a payload the blob store does not have.
    #[error("blob missing for live version: {0}")]
    MissingBlob(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(strata_core::Error),
}

impl From<strata_core::Error> for StoreError {
    fn from(err: strata_core::Error) -> Self {
        match err {
            strata_core::Error::InvalidPath(msg) => Self::InvalidPath(msg),
            strata_core::Error::InvalidContext(msg) => Self::InvalidContext(msg),
            other => Self::Core(other),
        }
    }
}

impl StoreError {
    /// Whether the whole write may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Metadata(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error is a subtree lock conflict.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Metadata(MetadataError::LockConflict { .. }))
    }

    /// Whether the error is a stale fence rejection, directly or as the
    /// last failure of an exhausted retry loop.
    pub fn is_stale_fence(&self) -> bool {
        match self {
            Self::Metadata(MetadataError::StaleFence { .. }) => true,
            Self::RetriesExhausted { last, .. } => last.is_stale_fence(),
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
