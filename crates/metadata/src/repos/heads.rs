//! HEAD pointer repository.

use crate::error::MetadataResult;
use crate::models::{HeadRow, HeadUpdate, NewVersionRow, VersionRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for fenced HEAD pointers.
#[async_trait]
pub trait HeadRepo: Send + Sync {
    async fn get_head(&self, inode_id: i64) -> MetadataResult<Option<HeadRow>>;

    /// The version HEAD currently points at.
    async fn get_head_version(&self, inode_id: i64) -> MetadataResult<Option<VersionRow>>;

    /// Compare-and-swap HEAD for one inode.
    ///
    /// With a fence token the move succeeds only if it is strictly greater
    /// than the published one (a missing token counts as -1). Without one
    /// (degraded mode) it succeeds only over an unfenced HEAD. A rejected
    /// move returns `StaleFence`.
    async fn publish_head(
        &self,
        update: HeadUpdate,
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Apply every move in one database transaction. Any stale entry rolls
    /// back the whole batch.
    async fn publish_heads(
        &self,
        updates: &[HeadUpdate],
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Append `version` and move HEAD to it in one database transaction.
    ///
    /// Besides the fence CAS, HEAD must still point at `expected_head`
    /// (`None`: the inode has no HEAD yet). Either check failing returns
    /// `StaleFence` and leaves no ledger row behind.
    async fn append_and_publish(
        &self,
        version: &NewVersionRow,
        expected_head: Option<i64>,
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<VersionRow>;
}
