//! Blob and version descriptors.

use crate::context::TransactionResult;
use crate::hash::ContentHash;
use crate::path::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// The mutation a version records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
    Deleted,
    Undeleted,
    Restored,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Undeleted => "undeleted",
            Self::Restored => "restored",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            "undeleted" => Ok(Self::Undeleted),
            "restored" => Ok(Self::Restored),
            other => Err(crate::Error::UnknownOperation(other.to_string())),
        }
    }

    /// Whether a path whose latest version carries this operation is live.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied attributes for a new payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlob {
    /// Display name, e.g. `report.pdf`.
    pub name: String,
    /// MIME type. Left blank to have it sniffed from the payload header.
    #[serde(default)]
    pub mime_type: String,
}

impl NewBlob {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Immutable content descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub hash: ContentHash,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// One mutation event on a path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    /// Ledger row id. Strictly increasing in insert order.
    pub id: i64,
    pub inode_id: i64,
    pub path: NormalizedPath,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub operation: Operation,
    pub principal: String,
    pub correlation_id: String,
    pub workflow_id: String,
    pub context_name: String,
    pub transaction_id: Option<String>,
    pub transaction_result: TransactionResult,
    pub blob: BlobMeta,
    /// Reason given for a delete.
    pub reason: Option<String>,
}

impl VersionMeta {
    pub fn is_live(&self) -> bool {
        self.operation.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_text_form() {
        for op in [
            Operation::Created,
            Operation::Updated,
            Operation::Deleted,
            Operation::Undeleted,
            Operation::Restored,
        ] {
            assert_eq!(Operation::parse(op.as_str()).unwrap(), op);
        }
        assert!(Operation::parse("renamed").is_err());
    }

    #[test]
    fn test_only_deleted_is_not_live() {
        assert!(!Operation::Deleted.is_live());
        assert!(Operation::Undeleted.is_live());
        assert!(Operation::Restored.is_live());
    }
}
