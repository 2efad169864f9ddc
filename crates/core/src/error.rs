//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("unknown transaction result: {0}")]
    UnknownTransactionResult(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
