//! Subtree-exclusive locks and fence token issuance.

use crate::error::{StoreError, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use strata_core::config::LockingConfig;
use strata_core::{NormalizedPath, PathKeyCodec};
use strata_metadata::models::{AdvisoryLockRow, PathLockRow};
use strata_metadata::MetadataStore;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A granted lock group. Pass it back to [`LockingService::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub lock_group_id: Uuid,
    pub owner_id: String,
    /// Fence token for every HEAD move made while holding this lock.
    pub fence_token: i64,
    pub paths: Vec<NormalizedPath>,
    pub acquired_at: OffsetDateTime,
    pub lease_expires_at: OffsetDateTime,
}

/// Grants exclusive locks on subtrees.
///
/// A lock on `/a` conflicts with any active lock on `/a`, an ancestor of
/// `/a`, or a descendant of `/a`. Every lock group carries a fresh,
/// strictly increasing fence token.
pub struct LockingService {
    metadata: Arc<dyn MetadataStore>,
    owner_id: String,
    lease: time::Duration,
    acquire_attempts: u32,
    acquire_delay: Duration,
    max_acquire_delay: Duration,
}

impl LockingService {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: &LockingConfig) -> Self {
        let owner_id = config
            .owner_id
            .clone()
            .unwrap_or_else(|| format!("strata-{}", Uuid::new_v4()));
        Self {
            metadata,
            owner_id,
            lease: config.lease(),
            acquire_attempts: config.acquire_attempts.max(1),
            acquire_delay: config.acquire_delay(),
            max_acquire_delay: config.max_acquire_delay(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Acquire one lock group covering `paths`, failing immediately on
    /// conflict with `MetadataError::LockConflict`.
    pub async fn acquire(&self, paths: &[NormalizedPath]) -> StoreResult<LockHandle> {
        if paths.is_empty() {
            return Err(StoreError::InvalidPath(
                "lock requires at least one path".to_string(),
            ));
        }

        let mut paths = paths.to_vec();
        paths.sort();
        paths.dedup();
        let scope_keys: Vec<String> = paths
            .iter()
            .map(|p| PathKeyCodec::encode(p).as_str().to_string())
            .collect();

        let now = OffsetDateTime::now_utc();
        let acquired = self
            .metadata
            .acquire_lock_group(&self.owner_id, &scope_keys, now, now + self.lease)
            .await?;

        debug!(
            lock_group_id = %acquired.group.lock_group_id,
            fence_token = acquired.group.fence_token,
            paths = paths.len(),
            "acquired lock group"
        );

        Ok(LockHandle {
            lock_group_id: acquired.group.lock_group_id,
            owner_id: acquired.group.owner_id,
            fence_token: acquired.group.fence_token,
            paths,
            acquired_at: acquired.group.acquired_at,
            lease_expires_at: acquired.group.lease_expires_at,
        })
    }

    /// Acquire with the configured attempt budget and delay.
    pub async fn acquire_with_retry(&self, paths: &[NormalizedPath]) -> StoreResult<LockHandle> {
        self.try_acquire_lock(paths, self.acquire_attempts, self.acquire_delay)
            .await
    }

    /// Retry [`acquire`](Self::acquire) on conflict or transient database
    /// errors. The wait before attempt `n + 1` is `delay * n`, capped.
    pub async fn try_acquire_lock(
        &self,
        paths: &[NormalizedPath],
        max_attempts: u32,
        delay: Duration,
    ) -> StoreResult<LockHandle> {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.acquire(paths).await {
                Ok(handle) => return Ok(handle),
                Err(err) if err.is_lock_conflict() || err.is_retryable() => {
                    if attempt == max_attempts {
                        warn!(attempts = max_attempts, error = %err, "giving up on lock");
                        break;
                    }
                    let wait = delay.saturating_mul(attempt).min(self.max_acquire_delay);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "lock busy");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::LockUnavailable {
            attempts: max_attempts,
        })
    }

    /// Release a lock group. Returns `false` if it was no longer active.
    pub async fn release(&self, handle: &LockHandle) -> StoreResult<bool> {
        let released = self
            .metadata
            .release_lock_group(handle.lock_group_id, OffsetDateTime::now_utc())
            .await?;
        if !released {
            warn!(
                lock_group_id = %handle.lock_group_id,
                "lock group was already released or reaped"
            );
        }
        Ok(released)
    }

    /// Mark every lock whose lease ended before `now` as released.
    pub async fn reap_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let reaped = self.metadata.reap_expired_locks(now).await?;
        if reaped > 0 {
            info!(reaped, "reaped expired lock groups");
        }
        Ok(reaped)
    }

    /// Active, unexpired path locks.
    pub async fn active_locks(&self) -> StoreResult<Vec<PathLockRow>> {
        Ok(self
            .metadata
            .list_active_locks(OffsetDateTime::now_utc())
            .await?)
    }

    /// Database advisory locks still held, for leak detection.
    pub async fn find_active_advisory_locks(
        &self,
        virtual_transaction: Option<&str>,
    ) -> StoreResult<Vec<AdvisoryLockRow>> {
        Ok(self
            .metadata
            .find_active_advisory_locks(virtual_transaction)
            .await?)
    }
}
