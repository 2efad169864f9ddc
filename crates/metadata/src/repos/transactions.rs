//! External transaction outcome repository.

use crate::error::MetadataResult;
use crate::models::{HeadUpdate, TransactionOutcomeRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for transaction outcomes.
///
/// Outcomes are write-once; recording a second outcome for the same
/// transaction returns `AlreadyExists`.
#[async_trait]
pub trait TransactionRepo: Send + Sync {
    async fn get_transaction_outcome(
        &self,
        transaction_id: &str,
    ) -> MetadataResult<Option<TransactionOutcomeRow>>;

    /// Publish the pending HEAD moves and record `committed`, atomically.
    async fn commit_transaction(
        &self,
        transaction_id: &str,
        updates: &[HeadUpdate],
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Record `rolled_back`. Publishes nothing.
    async fn rollback_transaction(
        &self,
        transaction_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;
}
