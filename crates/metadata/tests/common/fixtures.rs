//! Test fixtures and data generators.

use strata_core::{ContentHash, HashAlgorithm, NormalizedPath, PathKeyCodec};
use strata_metadata::MetadataStore;
use strata_metadata::models::{InodeRow, NewVersionRow};
use time::OffsetDateTime;

/// Content hash text for `data`.
pub fn hash_of(data: &[u8]) -> String {
    ContentHash::compute(HashAlgorithm::Sha256, data).to_string()
}

/// Create the inode chain for `path` directly through the repository.
#[allow(dead_code)]
pub async fn make_inode(store: &dyn MetadataStore, path: &str) -> InodeRow {
    let path = NormalizedPath::parse(path).unwrap();
    let now = OffsetDateTime::now_utc();
    let mut current = store
        .ensure_root_inode(PathKeyCodec::encode(&NormalizedPath::root()).as_str(), now)
        .await
        .unwrap();
    let mut prefix = NormalizedPath::root();
    for segment in path.segments() {
        prefix = prefix.join(segment).unwrap();
        current = match store.get_dir_entry(current.id, segment).await.unwrap() {
            Some(entry) => store.get_inode(entry.child_id).await.unwrap().unwrap(),
            None => store
                .create_child_inode(
                    current.id,
                    segment,
                    PathKeyCodec::encode(&prefix).as_str(),
                    now,
                )
                .await
                .unwrap(),
        };
    }
    current
}

/// An auto-committed version row.
#[allow(dead_code)]
pub fn new_version(inode_id: i64, path: &str, operation: &str, data: &[u8]) -> NewVersionRow {
    NewVersionRow {
        inode_id,
        path: path.to_string(),
        operation: operation.to_string(),
        principal: "tester".to_string(),
        correlation_id: "corr-1".to_string(),
        workflow_id: "wf-1".to_string(),
        context_name: "default".to_string(),
        transaction_id: None,
        transaction_result: "auto_committed".to_string(),
        hash: hash_of(data),
        name: "file.bin".to_string(),
        mime_type: "application/octet-stream".to_string(),
        size: data.len() as i64,
        reason: None,
    }
}

/// A version row written inside an in-flight transaction.
#[allow(dead_code)]
pub fn in_flight_version(
    inode_id: i64,
    path: &str,
    data: &[u8],
    transaction_id: &str,
) -> NewVersionRow {
    NewVersionRow {
        transaction_id: Some(transaction_id.to_string()),
        transaction_result: "in_flight".to_string(),
        ..new_version(inode_id, path, "created", data)
    }
}
