//! Path hierarchy resolution over inode and directory-entry rows.

use crate::error::{StoreError, StoreResult};
use std::sync::Arc;
use strata_core::{NormalizedPath, PathKeyCodec, ScopeKey};
use strata_metadata::models::InodeRow;
use strata_metadata::{MetadataError, MetadataStore};
use time::OffsetDateTime;
use tracing::{debug, instrument};

/// Resolves paths to inodes, creating missing inodes on demand.
///
/// Inodes and edges are created once and never moved, so a path and its
/// inode id are interchangeable for the life of the store.
#[derive(Clone)]
pub struct NamespaceTree {
    metadata: Arc<dyn MetadataStore>,
}

impl NamespaceTree {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Create the root inode if it does not exist yet.
    pub async fn ensure_root(&self) -> StoreResult<InodeRow> {
        let root = self
            .metadata
            .ensure_root_inode(ScopeKey::root().as_str(), OffsetDateTime::now_utc())
            .await?;
        Ok(root)
    }

    /// Return the inode for `path`, creating it and any missing ancestors.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn resolve_or_create_inode(&self, path: &NormalizedPath) -> StoreResult<InodeRow> {
        let leaf_key = PathKeyCodec::encode(path);
        if let Some(inode) = self.metadata.get_inode_by_scope_key(leaf_key.as_str()).await? {
            return Ok(inode);
        }

        let mut current = self.ensure_root().await?;
        let mut scope_key = ScopeKey::root();
        for segment in path.segments() {
            scope_key = scope_key.child(segment);
            current = match self.metadata.get_dir_entry(current.id, segment).await? {
                Some(entry) => self.inode(entry.child_id).await?,
                None => self.create_child(&current, segment, &scope_key).await?,
            };
        }
        Ok(current)
    }

    async fn create_child(
        &self,
        parent: &InodeRow,
        segment: &str,
        scope_key: &ScopeKey,
    ) -> StoreResult<InodeRow> {
        let created = self
            .metadata
            .create_child_inode(
                parent.id,
                segment,
                scope_key.as_str(),
                OffsetDateTime::now_utc(),
            )
            .await;
        match created {
            Ok(inode) => {
                debug!(parent_id = parent.id, inode_id = inode.id, segment, "created inode");
                Ok(inode)
            }
            Err(MetadataError::AlreadyExists(_)) => {
                // Lost the race: the winner's edge is authoritative.
                match self.metadata.get_dir_entry(parent.id, segment).await? {
                    Some(entry) => self.inode(entry.child_id).await,
                    None => Err(StoreError::Metadata(MetadataError::Internal(format!(
                        "scope key {scope_key} is taken by another path"
                    )))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn inode(&self, inode_id: i64) -> StoreResult<InodeRow> {
        self.metadata.get_inode(inode_id).await?.ok_or_else(|| {
            StoreError::Metadata(MetadataError::Internal(format!(
                "dir entry points at missing inode {inode_id}"
            )))
        })
    }

    /// Look up the inode id for `path` without creating anything.
    pub async fn resolve_inode_id(&self, path: &NormalizedPath) -> StoreResult<Option<i64>> {
        let scope_key = PathKeyCodec::encode(path);
        let inode = self
            .metadata
            .get_inode_by_scope_key(scope_key.as_str())
            .await?;
        Ok(inode.map(|i| i.id))
    }

    /// Reconstruct the path of an inode from its segment projection.
    ///
    /// `Ok(None)` if the inode does not exist. A non-root inode without a
    /// projection is a broken store and fails with `ProjectionMissing`.
    pub async fn resolve_path_from_inode(
        &self,
        inode_id: i64,
    ) -> StoreResult<Option<NormalizedPath>> {
        let Some(inode) = self.metadata.get_inode(inode_id).await? else {
            return Ok(None);
        };
        if inode.scope_key == ScopeKey::root().as_str() {
            return Ok(Some(NormalizedPath::root()));
        }

        let segments = self.metadata.get_path_segments(inode_id).await?;
        if segments.is_empty() {
            return Err(MetadataError::ProjectionMissing(inode_id).into());
        }
        Ok(Some(NormalizedPath::from_segments(segments)?))
    }

    /// Names of the direct children of `path`, in name order.
    pub async fn list_children(&self, path: &NormalizedPath) -> StoreResult<Vec<String>> {
        let Some(inode_id) = self.resolve_inode_id(path).await? else {
            return Ok(Vec::new());
        };
        let entries = self.metadata.list_dir_entries(inode_id).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }
}
