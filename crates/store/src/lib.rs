//! Versioned, content-addressable path store.
//!
//! Paths resolve to inodes through [`NamespaceTree`]. Payloads live in a
//! content-addressable blob store. Every mutation appends an immutable
//! version row, and the path's HEAD moves to it through a fenced
//! compare-and-swap in [`HeadPublisher`]. Fence tokens come from the
//! subtree locks issued by [`LockingService`].
//!
//! [`VersionStore`] ties these together behind the [`Readable`],
//! [`Writable`], [`Lockable`] and [`Transactable`] operation groups.

pub mod api;
pub mod error;
pub mod locking;
pub mod namespace;
pub mod publisher;
pub mod retry;
pub mod version_store;

pub use api::{Lockable, Readable, Transactable, Writable};
pub use error::{StoreError, StoreResult};
pub use locking::{LockHandle, LockingService};
pub use namespace::NamespaceTree;
pub use publisher::HeadPublisher;
pub use retry::RetryPolicy;
pub use version_store::VersionStore;
