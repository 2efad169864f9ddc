//! Repository traits for metadata operations.

pub mod heads;
pub mod locks;
pub mod namespace;
pub mod transactions;
pub mod versions;

pub use heads::HeadRepo;
pub use locks::{AcquiredLocks, LockRepo};
pub use namespace::NamespaceRepo;
pub use transactions::TransactionRepo;
pub use versions::VersionRepo;
