//! Operation groups a store implementation can offer.
//!
//! A store exposes exactly the groups it implements, so an unsupported
//! operation is a missing trait bound rather than a runtime check.

use crate::error::StoreResult;
use crate::locking::LockHandle;
use async_trait::async_trait;
use bytes::Bytes;
use strata_core::{
    BlobMeta, ContentHash, ContextSnapshot, NewBlob, NormalizedPath, StoreContext, VersionMeta,
};
use strata_storage::ByteStream;

/// Read-side operations. Absent and deleted paths read as empty.
#[async_trait]
pub trait Readable: Send + Sync {
    /// Content of the latest live version.
    async fn read(&self, ctx: &StoreContext, path: &NormalizedPath)
    -> StoreResult<Option<ByteStream>>;

    /// Latest version, including tombstones.
    async fn get_latest_version(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Option<VersionMeta>>;

    /// Full history of a path, oldest first.
    async fn get_all_versions(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Vec<VersionMeta>>;

    /// Latest versions of the live children of `path`.
    async fn list(&self, ctx: &StoreContext, path: &NormalizedPath)
    -> StoreResult<Vec<VersionMeta>>;

    /// Latest versions of every child of `path`, tombstones included.
    async fn get_children_latest_version(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Vec<VersionMeta>>;

    /// Paths of the direct children of `path`.
    async fn get_children_path(&self, path: &NormalizedPath) -> StoreResult<Vec<NormalizedPath>>;

    async fn get_content(&self, hash: &ContentHash) -> StoreResult<Option<Bytes>>;

    async fn get_content_meta(&self, hash: &ContentHash) -> StoreResult<Option<BlobMeta>>;
}

/// Mutations. Each returns the version it recorded, or `None` when the
/// path's state does not allow the operation.
#[async_trait]
pub trait Writable: Send + Sync {
    /// Create a new child of `parent` under a generated id.
    async fn create(
        &self,
        ctx: &StoreContext,
        parent: &NormalizedPath,
        blob: NewBlob,
        content: ByteStream,
    ) -> StoreResult<Option<VersionMeta>>;

    /// Create `parent/id`.
    async fn create_with_id(
        &self,
        ctx: &StoreContext,
        parent: &NormalizedPath,
        id: &str,
        blob: NewBlob,
        content: ByteStream,
    ) -> StoreResult<Option<VersionMeta>>;

    async fn update(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
        content: ByteStream,
    ) -> StoreResult<Option<VersionMeta>>;

    async fn delete(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
        reason: Option<&str>,
    ) -> StoreResult<Option<VersionMeta>>;

    async fn undelete(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Option<VersionMeta>>;

    /// Make the historical content `hash` current again.
    async fn restore(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
        hash: &ContentHash,
    ) -> StoreResult<Option<VersionMeta>>;
}

/// Explicit subtree locks.
#[async_trait]
pub trait Lockable: Send + Sync {
    async fn lock(&self, paths: &[NormalizedPath]) -> StoreResult<LockHandle>;

    async fn unlock(&self, handle: &LockHandle) -> StoreResult<bool>;
}

/// External transaction boundaries.
///
/// Writes made with an in-flight context are recorded but not published
/// until [`commit`](Transactable::commit).
#[async_trait]
pub trait Transactable: Send + Sync {
    /// Start a transaction, returning the context to write with.
    async fn begin(&self, snapshot: Option<&ContextSnapshot>) -> StoreResult<StoreContext>;

    /// Publish the latest pending version of every inode written in the
    /// transaction. Returns the published versions.
    async fn commit(&self, ctx: &StoreContext) -> StoreResult<Vec<VersionMeta>>;

    /// Discard the transaction. Nothing it wrote becomes visible.
    async fn rollback(&self, ctx: &StoreContext) -> StoreResult<()>;
}
