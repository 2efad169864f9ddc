//! Database models mapping to the metadata schema.

use crate::error::MetadataError;
use sqlx::FromRow;
use strata_core::{
    BlobMeta, ContentHash, NormalizedPath, Operation, TransactionResult, VersionMeta,
};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Namespace
// =============================================================================

/// A node in the path hierarchy.
#[derive(Debug, Clone, FromRow)]
pub struct InodeRow {
    pub id: i64,
    pub scope_key: String,
    pub created_at: OffsetDateTime,
}

/// Edge from a parent inode to a named child.
#[derive(Debug, Clone, FromRow)]
pub struct DirEntryRow {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub child_id: i64,
    pub created_at: OffsetDateTime,
}

/// One link of the materialized root-to-inode chain.
#[derive(Debug, Clone, FromRow)]
pub struct PathSegmentRow {
    pub inode_id: i64,
    pub ord: i32,
    pub dir_entry_id: i64,
}

// =============================================================================
// Version ledger
// =============================================================================

/// Version ledger row.
///
/// `transaction_result` is the effective result: once an outcome is recorded
/// for the row's transaction it replaces the value stored at insert time.
#[derive(Debug, Clone, FromRow)]
pub struct VersionRow {
    pub id: i64,
    pub inode_id: i64,
    pub recorded_at: OffsetDateTime,
    pub path: String,
    pub operation: String,
    pub principal: String,
    pub correlation_id: String,
    pub workflow_id: String,
    pub context_name: String,
    pub transaction_id: Option<String>,
    pub transaction_result: String,
    pub hash: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub reason: Option<String>,
}

/// A version about to be appended. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewVersionRow {
    pub inode_id: i64,
    pub path: String,
    pub operation: String,
    pub principal: String,
    pub correlation_id: String,
    pub workflow_id: String,
    pub context_name: String,
    pub transaction_id: Option<String>,
    pub transaction_result: String,
    pub hash: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub reason: Option<String>,
}

impl TryFrom<VersionRow> for VersionMeta {
    type Error = MetadataError;

    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        let corrupt = |e: strata_core::Error| {
            MetadataError::Internal(format!("version {} is corrupt: {e}", row.id))
        };
        let size = u64::try_from(row.size).map_err(|_| {
            MetadataError::Internal(format!("version {} has negative size", row.id))
        })?;

        Ok(VersionMeta {
            id: row.id,
            inode_id: row.inode_id,
            path: NormalizedPath::parse(&row.path).map_err(corrupt)?,
            timestamp: row.recorded_at,
            operation: Operation::parse(&row.operation).map_err(corrupt)?,
            principal: row.principal.clone(),
            correlation_id: row.correlation_id.clone(),
            workflow_id: row.workflow_id.clone(),
            context_name: row.context_name.clone(),
            transaction_id: row.transaction_id.clone(),
            transaction_result: TransactionResult::parse(&row.transaction_result)
                .map_err(corrupt)?,
            blob: BlobMeta {
                hash: ContentHash::parse(&row.hash).map_err(corrupt)?,
                name: row.name.clone(),
                mime_type: row.mime_type.clone(),
                size,
            },
            reason: row.reason.clone(),
        })
    }
}

// =============================================================================
// HEAD pointers
// =============================================================================

/// Current version per inode.
#[derive(Debug, Clone, FromRow)]
pub struct HeadRow {
    pub inode_id: i64,
    pub version_id: i64,
    /// `None` when published in degraded (unfenced) mode.
    pub fence_token: Option<i64>,
    pub updated_at: OffsetDateTime,
}

/// One HEAD move requested as part of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadUpdate {
    pub inode_id: i64,
    pub version_id: i64,
}

// =============================================================================
// Transactions
// =============================================================================

/// Recorded outcome of an external transaction.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionOutcomeRow {
    pub transaction_id: String,
    pub result: String,
    pub decided_at: OffsetDateTime,
}

// =============================================================================
// Locks
// =============================================================================

/// A batch lock acquisition.
#[derive(Debug, Clone, FromRow)]
pub struct LockGroupRow {
    pub lock_group_id: Uuid,
    pub owner_id: String,
    pub fence_token: i64,
    pub active: bool,
    pub acquired_at: OffsetDateTime,
    pub lease_expires_at: OffsetDateTime,
    pub released_at: Option<OffsetDateTime>,
}

/// Exclusive grant on one scope key within a lock group.
#[derive(Debug, Clone, FromRow)]
pub struct PathLockRow {
    pub id: Uuid,
    pub lock_group_id: Uuid,
    pub owner_id: String,
    pub scope_key: String,
    pub active: bool,
    pub acquired_at: OffsetDateTime,
    pub lease_expires_at: OffsetDateTime,
    pub released_at: Option<OffsetDateTime>,
}

/// A row of `pg_locks` for an advisory lock. Used for leak detection only.
#[derive(Debug, Clone, FromRow)]
pub struct AdvisoryLockRow {
    pub pid: Option<i32>,
    pub virtual_transaction: Option<String>,
    pub mode: Option<String>,
    pub granted: Option<bool>,
    pub classid: Option<i64>,
    pub objid: Option<i64>,
}
