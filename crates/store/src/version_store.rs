//! The versioned path store.
//!
//! Every mutation appends a version row and moves the path's HEAD to it. The state of a path is the operation of its latest version:
//!
//! ```text
//! absent -> created -> updated* -> deleted -> undeleted -> updated* -> ...
//! restored(hash) takes the state of the historical version it restores
//! ```
//!
//! Auto-committed writes check their precondition under the path's lock
//! and append the version together with the HEAD move, so a failed write
//! leaves no trace in history. Writes made with an in-flight context are
//! appended to the ledger but their HEAD moves wait for
//! [`Transactable::commit`].

use crate::api::{Lockable, Readable, Transactable, Writable};
use crate::error::{StoreError, StoreResult};
use crate::locking::{LockHandle, LockingService};
use crate::namespace::NamespaceTree;
use crate::publisher::HeadPublisher;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use strata_core::config::AppConfig;
use strata_core::{
    BlobMeta, ContentHash, ContextSnapshot, NewBlob, NormalizedPath, Operation, StoreContext,
    TransactionResult, VersionMeta,
};
use strata_metadata::models::{HeadUpdate, NewVersionRow, VersionRow};
use strata_metadata::{MetadataError, MetadataStore};
use strata_storage::{BlobStore, ByteStream};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Versioned, content-addressable path store.
#[derive(Clone)]
pub struct VersionStore {
    metadata: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    namespace: NamespaceTree,
    locking: Option<Arc<LockingService>>,
    publisher: HeadPublisher,
}

fn to_meta(row: VersionRow) -> StoreResult<VersionMeta> {
    Ok(VersionMeta::try_from(row)?)
}

fn to_metas(rows: Vec<VersionRow>) -> StoreResult<Vec<VersionMeta>> {
    rows.into_iter().map(to_meta).collect()
}

/// Transaction whose pending rows the context may see.
fn visible_to(ctx: &StoreContext) -> Option<&str> {
    if ctx.is_in_flight() {
        ctx.transaction_id()
    } else {
        None
    }
}

/// Ledger row for `operation` carrying the caller's context.
fn version_row(
    ctx: &StoreContext,
    inode_id: i64,
    path: &NormalizedPath,
    operation: Operation,
    blob: &BlobMeta,
    reason: Option<&str>,
) -> StoreResult<NewVersionRow> {
    let size = i64::try_from(blob.size).map_err(|_| {
        StoreError::Metadata(MetadataError::Constraint(format!(
            "blob size {} out of range",
            blob.size
        )))
    })?;
    Ok(NewVersionRow {
        inode_id,
        path: path.as_string(),
        operation: operation.as_str().to_string(),
        principal: ctx.principal().to_string(),
        correlation_id: ctx.correlation_id().to_string(),
        workflow_id: ctx.workflow_id().to_string(),
        context_name: ctx.context_name().to_string(),
        transaction_id: ctx.transaction_id().map(str::to_string),
        transaction_result: ctx.transaction_result().as_str().to_string(),
        hash: blob.hash.to_string(),
        name: blob.name.clone(),
        mime_type: blob.mime_type.clone(),
        size,
        reason: reason.map(str::to_string),
    })
}

impl VersionStore {
    /// Assemble a store from its parts. `locking: None` runs HEAD
    /// publication in degraded (unfenced) mode.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: BlobStore,
        locking: Option<Arc<LockingService>>,
        retry: RetryPolicy,
    ) -> Self {
        let publisher = HeadPublisher::new(metadata.clone(), locking.clone(), retry);
        Self {
            namespace: NamespaceTree::new(metadata.clone()),
            metadata,
            blobs,
            locking,
            publisher,
        }
    }

    /// Build a store from configuration and bootstrap the root inode.
    pub async fn from_config(config: &AppConfig) -> StoreResult<Self> {
        config.validate()?;

        let metadata = strata_metadata::from_config(&config.metadata).await?;
        let blobs =
            strata_storage::blob_store_from_config(&config.storage, &config.hashing).await?;
        let locking = config
            .locking
            .enabled
            .then(|| Arc::new(LockingService::new(metadata.clone(), &config.locking)));

        let store = Self::new(
            metadata,
            blobs,
            locking,
            RetryPolicy::from_config(&config.publish),
        );
        store.namespace.ensure_root().await?;

        info!(
            metadata = store.metadata.backend_name(),
            hash = %store.blobs.algorithm(),
            degraded = store.publisher.is_degraded(),
            "version store ready"
        );
        Ok(store)
    }

    pub fn namespace(&self) -> &NamespaceTree {
        &self.namespace
    }

    pub fn publisher(&self) -> &HeadPublisher {
        &self.publisher
    }

    pub fn locking(&self) -> Option<&Arc<LockingService>> {
        self.locking.as_ref()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Check both the metadata database and the blob backend.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.metadata.health_check().await?;
        self.blobs.health_check().await?;
        Ok(())
    }

    /// Latest version of an inode as seen by `ctx`: the caller's own
    /// pending row if it has one, otherwise the published HEAD.
    async fn latest(&self, ctx: &StoreContext, inode_id: i64) -> StoreResult<Option<VersionMeta>> {
        if let Some(txn) = visible_to(ctx)
            && let Some(row) = self.metadata.latest_in_transaction(inode_id, txn).await?
        {
            return Ok(Some(to_meta(row)?));
        }
        self.metadata
            .get_head_version(inode_id)
            .await?
            .map(to_meta)
            .transpose()
    }

    async fn latest_at(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Option<(i64, VersionMeta)>> {
        let Some(inode_id) = self.namespace.resolve_inode_id(path).await? else {
            return Ok(None);
        };
        Ok(self.latest(ctx, inode_id).await?.map(|v| (inode_id, v)))
    }

    /// Reject writes under a transaction that is already decided.
    async fn ensure_writable(&self, ctx: &StoreContext) -> StoreResult<()> {
        ctx.validate()?;
        match ctx.transaction_result() {
            TransactionResult::AutoCommitted => Ok(()),
            TransactionResult::InFlight => {
                self.open_transaction(ctx).await?;
                Ok(())
            }
            result => Err(StoreError::InvalidContext(format!(
                "cannot write under a {result} transaction"
            ))),
        }
    }

    /// Transaction id of an in-flight context with no recorded outcome.
    async fn open_transaction<'a>(&self, ctx: &'a StoreContext) -> StoreResult<&'a str> {
        let txn = match (ctx.transaction_id(), ctx.is_in_flight()) {
            (Some(txn), true) => txn,
            (txn, _) => {
                return Err(StoreError::UnknownTransaction(
                    txn.unwrap_or("<none>").to_string(),
                ));
            }
        };
        if self.metadata.get_transaction_outcome(txn).await?.is_some() {
            return Err(StoreError::UnknownTransaction(txn.to_string()));
        }
        Ok(txn)
    }

    /// Record `operation` on `path` and publish it, unless `ctx` is in
    /// flight, in which case publication waits for commit.
    ///
    /// `decide` sees the latest version at write time and returns the blob
    /// to record, or `None` when the write no longer applies. Auto-committed
    /// writes decide under the path's lock against the published HEAD, and
    /// the ledger row lands together with the HEAD move or not at all. A
    /// HEAD that moved between the decision and the move retries the whole
    /// write with a fresh fence.
    #[instrument(skip(self, ctx, decide), fields(path = %path, operation = %operation))]
    pub async fn persist_and_publish<F>(
        &self,
        ctx: &StoreContext,
        inode_id: i64,
        path: &NormalizedPath,
        operation: Operation,
        reason: Option<&str>,
        decide: F,
    ) -> StoreResult<Option<VersionMeta>>
    where
        F: Fn(Option<&VersionMeta>) -> Option<BlobMeta> + Send + Sync,
    {
        self.ensure_writable(ctx).await?;

        if ctx.is_in_flight() {
            let latest = self.latest(ctx, inode_id).await?;
            let Some(blob) = decide(latest.as_ref()) else {
                warn!(inode_id, "write no longer applies");
                return Ok(None);
            };
            let row = version_row(ctx, inode_id, path, operation, &blob, reason)?;
            let appended = self.metadata.append_version(&row).await?;
            debug!(inode_id, version_id = appended.id, "publication deferred to commit");
            return Ok(Some(to_meta(appended)?));
        }

        let metadata = &self.metadata;
        let decide = &decide;
        let written = self
            .publisher
            .with_fence(std::slice::from_ref(path), operation.as_str(), |fence| async move {
                let head = metadata
                    .get_head_version(inode_id)
                    .await?
                    .map(to_meta)
                    .transpose()?;
                let Some(blob) = decide(head.as_ref()) else {
                    return Ok(None);
                };
                let row = version_row(ctx, inode_id, path, operation, &blob, reason)?;
                let appended = metadata
                    .append_and_publish(
                        &row,
                        head.map(|h| h.id),
                        fence,
                        OffsetDateTime::now_utc(),
                    )
                    .await?;
                Ok::<_, StoreError>(Some((to_meta(appended)?, fence)))
            })
            .await?;

        match written {
            Some((version, fence)) => {
                info!(inode_id, version_id = version.id, fence_token = ?fence, "published version");
                Ok(Some(version))
            }
            None => {
                warn!(inode_id, "write no longer applies to the current head");
                Ok(None)
            }
        }
    }

    /// Children's latest versions as seen by `ctx`, in name order.
    async fn children_latest(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Vec<VersionMeta>> {
        let Some(parent_id) = self.namespace.resolve_inode_id(path).await? else {
            return Ok(Vec::new());
        };
        let mut children = to_metas(self.metadata.children_head_versions(parent_id).await?)?;

        if let Some(txn) = visible_to(ctx) {
            for pending in to_metas(self.metadata.pending_in_transaction(txn).await?)? {
                if pending.path.parent().as_ref() != Some(path) {
                    continue;
                }
                match children.iter_mut().find(|c| c.inode_id == pending.inode_id) {
                    Some(slot) => *slot = pending,
                    None => children.push(pending),
                }
            }
            children.sort_by(|a, b| a.path.name().cmp(&b.path.name()));
        }
        Ok(children)
    }
}

#[async_trait]
impl Readable for VersionStore {
    async fn read(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Option<ByteStream>> {
        let Some((_, latest)) = self.latest_at(ctx, path).await? else {
            debug!(path = %path, "read of absent path");
            return Ok(None);
        };
        if !latest.is_live() {
            warn!(path = %path, version_id = latest.id, "read of deleted path");
            return Ok(None);
        }
        match self.blobs.retrieve(&latest.blob.hash).await? {
            Some(stream) => Ok(Some(stream)),
            None => Err(StoreError::MissingBlob(latest.blob.hash.to_string())),
        }
    }

    async fn get_latest_version(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Option<VersionMeta>> {
        Ok(self.latest_at(ctx, path).await?.map(|(_, v)| v))
    }

    async fn get_all_versions(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Vec<VersionMeta>> {
        let Some(inode_id) = self.namespace.resolve_inode_id(path).await? else {
            return Ok(Vec::new());
        };
        to_metas(
            self.metadata
                .list_versions(inode_id, visible_to(ctx))
                .await?,
        )
    }

    async fn list(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Vec<VersionMeta>> {
        let mut children = self.children_latest(ctx, path).await?;
        children.retain(VersionMeta::is_live);
        Ok(children)
    }

    async fn get_children_latest_version(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Vec<VersionMeta>> {
        self.children_latest(ctx, path).await
    }

    async fn get_children_path(&self, path: &NormalizedPath) -> StoreResult<Vec<NormalizedPath>> {
        let names = self.namespace.list_children(path).await?;
        names
            .iter()
            .map(|name| path.join(name).map_err(StoreError::from))
            .collect()
    }

    async fn get_content(&self, hash: &ContentHash) -> StoreResult<Option<Bytes>> {
        Ok(self.blobs.read_all(hash).await?)
    }

    async fn get_content_meta(&self, hash: &ContentHash) -> StoreResult<Option<BlobMeta>> {
        let row = self.metadata.find_by_hash(&hash.to_string()).await?;
        Ok(row.map(to_meta).transpose()?.map(|v| v.blob))
    }
}

#[async_trait]
impl Writable for VersionStore {
    async fn create(
        &self,
        ctx: &StoreContext,
        parent: &NormalizedPath,
        blob: NewBlob,
        content: ByteStream,
    ) -> StoreResult<Option<VersionMeta>> {
        let id = Uuid::new_v4().to_string();
        self.create_with_id(ctx, parent, &id, blob, content).await
    }

    async fn create_with_id(
        &self,
        ctx: &StoreContext,
        parent: &NormalizedPath,
        id: &str,
        blob: NewBlob,
        content: ByteStream,
    ) -> StoreResult<Option<VersionMeta>> {
        let path = parent.join(id)?;
        self.ensure_writable(ctx).await?;

        let inode = self.namespace.resolve_or_create_inode(&path).await?;
        if let Some(latest) = self.latest(ctx, inode.id).await?
            && latest.is_live()
        {
            warn!(path = %path, version_id = latest.id, "create on live path");
            return Ok(None);
        }

        let saved = self.blobs.save(blob, content).await?;
        self.persist_and_publish(ctx, inode.id, &path, Operation::Created, None, |latest| {
            match latest {
                Some(v) if v.is_live() => None,
                _ => Some(saved.meta.clone()),
            }
        })
        .await
    }

    async fn update(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
        content: ByteStream,
    ) -> StoreResult<Option<VersionMeta>> {
        let Some((inode_id, latest)) = self.latest_at(ctx, path).await? else {
            warn!(path = %path, "update of absent path");
            return Ok(None);
        };
        if !latest.is_live() {
            warn!(path = %path, version_id = latest.id, "update of deleted path");
            return Ok(None);
        }
        self.ensure_writable(ctx).await?;

        let blob = NewBlob::new(latest.blob.name, latest.blob.mime_type);
        let saved = self.blobs.save(blob, content).await?;
        self.persist_and_publish(ctx, inode_id, path, Operation::Updated, None, |latest| {
            latest.filter(|v| v.is_live()).map(|v| BlobMeta {
                name: v.blob.name.clone(),
                mime_type: v.blob.mime_type.clone(),
                ..saved.meta.clone()
            })
        })
        .await
    }

    async fn delete(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
        reason: Option<&str>,
    ) -> StoreResult<Option<VersionMeta>> {
        let Some((inode_id, latest)) = self.latest_at(ctx, path).await? else {
            warn!(path = %path, "delete of absent path");
            return Ok(None);
        };
        if !latest.is_live() {
            warn!(path = %path, version_id = latest.id, "path already deleted");
            return Ok(None);
        }
        self.persist_and_publish(ctx, inode_id, path, Operation::Deleted, reason, |latest| {
            latest.filter(|v| v.is_live()).map(|v| v.blob.clone())
        })
        .await
    }

    async fn undelete(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
    ) -> StoreResult<Option<VersionMeta>> {
        let Some((inode_id, latest)) = self.latest_at(ctx, path).await? else {
            warn!(path = %path, "undelete of absent path");
            return Ok(None);
        };
        if latest.is_live() {
            warn!(path = %path, version_id = latest.id, "undelete of live path");
            return Ok(None);
        }
        self.persist_and_publish(ctx, inode_id, path, Operation::Undeleted, None, |latest| {
            latest.filter(|v| !v.is_live()).map(|v| v.blob.clone())
        })
        .await
    }

    async fn restore(
        &self,
        ctx: &StoreContext,
        path: &NormalizedPath,
        hash: &ContentHash,
    ) -> StoreResult<Option<VersionMeta>> {
        let Some(inode_id) = self.namespace.resolve_inode_id(path).await? else {
            warn!(path = %path, "restore of absent path");
            return Ok(None);
        };
        let historical = self
            .metadata
            .find_version_by_hash(inode_id, &hash.to_string(), visible_to(ctx))
            .await?;
        let Some(historical) = historical else {
            warn!(path = %path, hash = %hash, "no version with that content");
            return Ok(None);
        };
        let historical = to_meta(historical)?;
        self.persist_and_publish(ctx, inode_id, path, Operation::Restored, None, |_| {
            Some(historical.blob.clone())
        })
        .await
    }
}

#[async_trait]
impl Lockable for VersionStore {
    async fn lock(&self, paths: &[NormalizedPath]) -> StoreResult<LockHandle> {
        let locking = self.locking.as_ref().ok_or(StoreError::LockingDisabled)?;
        locking.acquire_with_retry(paths).await
    }

    async fn unlock(&self, handle: &LockHandle) -> StoreResult<bool> {
        let locking = self.locking.as_ref().ok_or(StoreError::LockingDisabled)?;
        locking.release(handle).await
    }
}

#[async_trait]
impl Transactable for VersionStore {
    async fn begin(&self, snapshot: Option<&ContextSnapshot>) -> StoreResult<StoreContext> {
        let ctx = StoreContext::from_snapshot(snapshot)?.begin_transaction();
        debug!(transaction_id = ?ctx.transaction_id(), "began transaction");
        Ok(ctx)
    }

    async fn commit(&self, ctx: &StoreContext) -> StoreResult<Vec<VersionMeta>> {
        let txn = self.open_transaction(ctx).await?;
        let pending = self.metadata.pending_in_transaction(txn).await?;

        let mut paths = Vec::with_capacity(pending.len());
        let mut updates = Vec::with_capacity(pending.len());
        for row in &pending {
            paths.push(NormalizedPath::parse(&row.path)?);
            updates.push(HeadUpdate {
                inode_id: row.inode_id,
                version_id: row.id,
            });
        }

        let metadata = &self.metadata;
        let record = |fence: Option<i64>| {
            let updates = &updates;
            async move {
                match metadata
                    .commit_transaction(txn, updates, fence, OffsetDateTime::now_utc())
                    .await
                {
                    Err(MetadataError::AlreadyExists(_)) => {
                        Err(StoreError::UnknownTransaction(txn.to_string()))
                    }
                    other => other.map_err(StoreError::from),
                }
            }
        };
        if paths.is_empty() {
            record(None).await?;
        } else {
            self.publisher.with_fence(&paths, "commit", record).await?;
        }

        let mut published = Vec::with_capacity(updates.len());
        for update in &updates {
            if let Some(row) = self.metadata.get_version(update.version_id).await? {
                published.push(to_meta(row)?);
            }
        }
        info!(transaction_id = txn, versions = published.len(), "committed transaction");
        Ok(published)
    }

    async fn rollback(&self, ctx: &StoreContext) -> StoreResult<()> {
        let txn = self.open_transaction(ctx).await?;
        match self
            .metadata
            .rollback_transaction(txn, OffsetDateTime::now_utc())
            .await
        {
            Ok(()) => {
                info!(transaction_id = txn, "rolled back transaction");
                Ok(())
            }
            Err(MetadataError::AlreadyExists(_)) => {
                Err(StoreError::UnknownTransaction(txn.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
