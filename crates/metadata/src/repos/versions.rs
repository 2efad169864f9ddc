//! Version ledger repository.

use crate::error::MetadataResult;
use crate::models::{NewVersionRow, VersionRow};
use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

/// Column list for version reads. The recorded transaction outcome, when
/// present, overrides the result stored on the row.
pub(crate) const VERSION_COLUMNS: &str = "v.id, v.inode_id, v.recorded_at, v.path, v.operation, \
     v.principal, v.correlation_id, v.workflow_id, v.context_name, v.transaction_id, \
     COALESCE(o.result, v.transaction_result) AS transaction_result, \
     v.hash, v.name, v.mime_type, v.size, v.reason";

pub(crate) const VERSION_FROM: &str = "FROM node_version v \
     LEFT JOIN transaction_outcome o ON o.transaction_id = v.transaction_id";

/// Timestamp for a new row: `now` truncated to microseconds, or one
/// microsecond after the inode's previous row if the clock has not advanced.
pub(crate) fn next_recorded_at(
    previous: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> OffsetDateTime {
    let now = now
        .replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now);
    match previous {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}

/// Repository for the append-only version ledger.
///
/// Methods taking `visible_to` return rows that are auto-committed,
/// committed, or belong to that in-flight transaction. Rolled back rows and
/// other transactions' pending rows are never returned by them.
#[async_trait]
pub trait VersionRepo: Send + Sync {
    /// Append a version. The timestamp is assigned here and never goes
    /// backwards for an inode.
    async fn append_version(&self, version: &NewVersionRow) -> MetadataResult<VersionRow>;

    async fn get_version(&self, version_id: i64) -> MetadataResult<Option<VersionRow>>;

    /// All visible versions of an inode, oldest first.
    async fn list_versions(
        &self,
        inode_id: i64,
        visible_to: Option<&str>,
    ) -> MetadataResult<Vec<VersionRow>>;

    /// Newest visible version of an inode carrying `hash`.
    async fn find_version_by_hash(
        &self,
        inode_id: i64,
        hash: &str,
        visible_to: Option<&str>,
    ) -> MetadataResult<Option<VersionRow>>;

    /// Newest row written for `inode_id` under `transaction_id`.
    async fn latest_in_transaction(
        &self,
        inode_id: i64,
        transaction_id: &str,
    ) -> MetadataResult<Option<VersionRow>>;

    /// Newest row per inode written under `transaction_id`, ordered by inode.
    async fn pending_in_transaction(&self, transaction_id: &str)
    -> MetadataResult<Vec<VersionRow>>;

    /// Newest visible row referencing `hash` on any path.
    async fn find_by_hash(&self, hash: &str) -> MetadataResult<Option<VersionRow>>;

    /// HEAD versions of the direct children of `parent_id`, ordered by name.
    async fn children_head_versions(&self, parent_id: i64) -> MetadataResult<Vec<VersionRow>>;
}
