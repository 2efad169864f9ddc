//! Lock group and path lock repository.

use crate::error::MetadataResult;
use crate::models::{AdvisoryLockRow, LockGroupRow, PathLockRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// A granted lock group and its per-path grants.
#[derive(Debug, Clone)]
pub struct AcquiredLocks {
    pub group: LockGroupRow,
    pub paths: Vec<PathLockRow>,
}

/// Repository for subtree-exclusive locks and fence token allocation.
///
/// Two scope keys conflict when one equals, or is a dotted prefix of, the
/// other. Locks whose lease has expired never conflict.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Allocate the next fence token. Tokens are strictly increasing.
    async fn next_fence_token(&self) -> MetadataResult<i64>;

    /// Check overlap, allocate a fence token and insert the group with one
    /// grant per scope key, in one database transaction.
    ///
    /// Returns `LockConflict` naming the first requested key that overlaps
    /// an active lock.
    async fn acquire_lock_group(
        &self,
        owner_id: &str,
        scope_keys: &[String],
        now: OffsetDateTime,
        lease_expires_at: OffsetDateTime,
    ) -> MetadataResult<AcquiredLocks>;

    /// Mark a group and its grants released. Returns false if it was
    /// already inactive.
    async fn release_lock_group(
        &self,
        lock_group_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    async fn get_lock_group(&self, lock_group_id: Uuid) -> MetadataResult<Option<LockGroupRow>>;

    /// Active, unexpired grants ordered by scope key.
    async fn list_active_locks(&self, now: OffsetDateTime) -> MetadataResult<Vec<PathLockRow>>;

    /// Release every active group whose lease expired before `now`.
    /// Returns the number of groups released.
    async fn reap_expired_locks(&self, now: OffsetDateTime) -> MetadataResult<u64>;

    /// Advisory locks currently held, optionally restricted to one virtual
    /// transaction. Always empty on backends without advisory locks.
    async fn find_active_advisory_locks(
        &self,
        virtual_transaction: Option<&str>,
    ) -> MetadataResult<Vec<AdvisoryLockRow>>;
}
