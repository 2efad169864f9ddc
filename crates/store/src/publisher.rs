//! Fenced HEAD publication.
//!
//! HEAD moves are a compare-and-swap on the fence token: an update only
//! lands if the incoming token is strictly greater than the published one.
//! Among concurrent writers the highest fence wins regardless of arrival
//! order. A writer whose token was not greater sees `StaleFence` and is
//! expected to take a fresh lock and try again.

use crate::error::StoreResult;
use crate::locking::LockingService;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use strata_core::NormalizedPath;
use strata_metadata::MetadataStore;
use strata_metadata::models::HeadUpdate;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Moves HEAD pointers under a fence token.
///
/// Without a [`LockingService`] the publisher runs in degraded mode: HEAD
/// moves carry no fence and are refused for any inode that already has a
/// fenced HEAD.
#[derive(Clone)]
pub struct HeadPublisher {
    metadata: Arc<dyn MetadataStore>,
    locking: Option<Arc<LockingService>>,
    retry: RetryPolicy,
}

impl HeadPublisher {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        locking: Option<Arc<LockingService>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            metadata,
            locking,
            retry,
        }
    }

    /// Whether HEAD moves are unfenced.
    pub fn is_degraded(&self) -> bool {
        self.locking.is_none()
    }

    /// One CAS attempt for a single inode.
    pub async fn publish(
        &self,
        inode_id: i64,
        version_id: i64,
        fence_token: Option<i64>,
    ) -> StoreResult<()> {
        let update = HeadUpdate {
            inode_id,
            version_id,
        };
        self.metadata
            .publish_head(update, fence_token, OffsetDateTime::now_utc())
            .await?;
        debug!(inode_id, version_id, ?fence_token, "published head");
        Ok(())
    }

    /// CAS every update in one database transaction. A single stale entry
    /// rolls back the whole batch.
    pub async fn publish_all(
        &self,
        updates: &[HeadUpdate],
        fence_token: Option<i64>,
    ) -> StoreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.metadata
            .publish_heads(updates, fence_token, OffsetDateTime::now_utc())
            .await?;
        debug!(count = updates.len(), ?fence_token, "published heads");
        Ok(())
    }

    /// Lock `paths`, publish `updates` with the lock's fence token, and
    /// release the lock, retrying the whole sequence on transient conflict.
    pub async fn acquire_lock_and_publish(
        &self,
        paths: &[NormalizedPath],
        updates: &[HeadUpdate],
    ) -> StoreResult<Option<i64>> {
        self.with_fence(paths, "publish", |fence| async move {
            self.publish_all(updates, fence).await?;
            Ok(fence)
        })
        .await
    }

    /// Run `op` with a fresh fence token per attempt.
    ///
    /// Each attempt takes a new lock group on `paths` and releases it
    /// afterwards whatever the outcome. In degraded mode `op` receives
    /// `None` and no lock is taken.
    pub async fn with_fence<T, F, Fut>(
        &self,
        paths: &[NormalizedPath],
        operation: &str,
        mut op: F,
    ) -> StoreResult<T>
    where
        F: FnMut(Option<i64>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match self.attempt(paths, attempt, &mut op).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let delay = self.retry.after_failure(operation, attempt, err)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        paths: &[NormalizedPath],
        attempt: u32,
        op: &mut F,
    ) -> StoreResult<T>
    where
        F: FnMut(Option<i64>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let Some(locking) = &self.locking else {
            return op(None).await;
        };

        let handle = locking.acquire_with_retry(paths).await?;
        debug!(
            attempt,
            fence_token = handle.fence_token,
            lock_group_id = %handle.lock_group_id,
            "holding lock"
        );
        let result = op(Some(handle.fence_token)).await;
        if let Err(err) = locking.release(&handle).await {
            warn!(
                lock_group_id = %handle.lock_group_id,
                error = %err,
                "failed to release lock group"
            );
        }
        result
    }
}
