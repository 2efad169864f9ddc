//! Namespace repository: inodes, directory entries and path projections.

use crate::error::MetadataResult;
use crate::models::{DirEntryRow, InodeRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for the inode hierarchy.
///
/// Inodes and directory entries are created once and never mutated.
#[async_trait]
pub trait NamespaceRepo: Send + Sync {
    /// Create the root inode if it does not exist and return it.
    async fn ensure_root_inode(
        &self,
        scope_key: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<InodeRow>;

    async fn get_inode(&self, inode_id: i64) -> MetadataResult<Option<InodeRow>>;

    async fn get_inode_by_scope_key(&self, scope_key: &str) -> MetadataResult<Option<InodeRow>>;

    /// Get the entry named `name` under `parent_id`.
    async fn get_dir_entry(
        &self,
        parent_id: i64,
        name: &str,
    ) -> MetadataResult<Option<DirEntryRow>>;

    /// Atomically create a child inode, its directory entry and its path
    /// projection (the parent's chain plus the new entry).
    ///
    /// Returns `AlreadyExists` if another writer created `(parent_id, name)`
    /// first; the caller should re-read the existing entry.
    async fn create_child_inode(
        &self,
        parent_id: i64,
        name: &str,
        scope_key: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<InodeRow>;

    /// Segment names from the root to `inode_id`, in order.
    ///
    /// Empty for the root and for any inode without a projection; callers
    /// distinguish the two.
    async fn get_path_segments(&self, inode_id: i64) -> MetadataResult<Vec<String>>;

    /// Direct children of `parent_id`, ordered by name.
    async fn list_dir_entries(&self, parent_id: i64) -> MetadataResult<Vec<DirEntryRow>>;
}
