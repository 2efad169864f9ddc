//! Core domain types for the Strata versioned path store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Normalized paths and their hierarchical scope keys
//! - Content hashes and the configurable hashing algorithm
//! - Blob and version descriptors
//! - The store context recorded on every mutation
//! - Configuration

pub mod config;
pub mod context;
pub mod error;
pub mod hash;
pub mod path;
pub mod scope_key;
pub mod version;

pub use context::{ContextSnapshot, StoreContext, TransactionResult};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher, HashAlgorithm};
pub use path::NormalizedPath;
pub use scope_key::{PathKeyCodec, ScopeKey};
pub use version::{BlobMeta, NewBlob, Operation, VersionMeta};
