//! The per-mutation context recorded on every version.
//!
//! Propagating request-scoped ids is the caller's concern. The store only
//! consumes a [`ContextSnapshot`] and turns it into a validated
//! [`StoreContext`], filling deterministic defaults for absent fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Principal recorded when no caller identity is available.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// Context name recorded when the caller does not supply one.
pub const DEFAULT_CONTEXT_NAME: &str = "default";

/// How the write that produced a version was committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionResult {
    /// No external transaction; HEAD was published immediately.
    #[default]
    AutoCommitted,
    /// Written inside an external transaction that has not been decided yet.
    InFlight,
    Committed,
    RolledBack,
}

impl TransactionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoCommitted => "auto_committed",
            Self::InFlight => "in_flight",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "auto_committed" => Ok(Self::AutoCommitted),
            "in_flight" => Ok(Self::InFlight),
            "committed" => Ok(Self::Committed),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(crate::Error::UnknownTransactionResult(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, possibly partial context captured by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub principal: Option<String>,
    pub correlation_id: Option<String>,
    pub workflow_id: Option<String>,
    pub context_name: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_result: Option<TransactionResult>,
}

impl ContextSnapshot {
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = Some(name.into());
        self
    }
}

/// Validated context attached to every version row.
///
/// `transaction_id` is `None` exactly when `transaction_result` is
/// [`TransactionResult::AutoCommitted`]; every other field is non-blank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreContext {
    principal: String,
    correlation_id: String,
    workflow_id: String,
    context_name: String,
    transaction_id: Option<String>,
    transaction_result: TransactionResult,
}

impl StoreContext {
    /// Context used when no caller context is active.
    pub fn anonymous() -> Self {
        Self {
            principal: ANONYMOUS_PRINCIPAL.to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            workflow_id: Uuid::new_v4().to_string(),
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            transaction_id: None,
            transaction_result: TransactionResult::AutoCommitted,
        }
    }

    /// Build from a caller snapshot, defaulting absent fields.
    pub fn from_snapshot(snapshot: Option<&ContextSnapshot>) -> crate::Result<Self> {
        let Some(snapshot) = snapshot else {
            return Ok(Self::anonymous());
        };

        let transaction_result = snapshot.transaction_result.unwrap_or(
            if snapshot.transaction_id.is_some() {
                TransactionResult::InFlight
            } else {
                TransactionResult::AutoCommitted
            },
        );

        let ctx = Self {
            principal: non_blank("principal", snapshot.principal.as_deref())?
                .unwrap_or_else(|| ANONYMOUS_PRINCIPAL.to_string()),
            correlation_id: non_blank("correlation_id", snapshot.correlation_id.as_deref())?
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            workflow_id: non_blank("workflow_id", snapshot.workflow_id.as_deref())?
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            context_name: non_blank("context_name", snapshot.context_name.as_deref())?
                .unwrap_or_else(|| DEFAULT_CONTEXT_NAME.to_string()),
            transaction_id: non_blank("transaction_id", snapshot.transaction_id.as_deref())?,
            transaction_result,
        };
        ctx.validate()?;
        Ok(ctx)
    }

    /// Start an external transaction on top of this context.
    pub fn begin_transaction(&self) -> Self {
        Self {
            transaction_id: Some(Uuid::new_v4().to_string()),
            transaction_result: TransactionResult::InFlight,
            ..self.clone()
        }
    }

    /// Check the transaction id / result pairing.
    pub fn validate(&self) -> crate::Result<()> {
        match (&self.transaction_id, self.transaction_result) {
            (Some(id), TransactionResult::AutoCommitted) => Err(crate::Error::InvalidContext(
                format!("transaction {id} cannot be auto-committed"),
            )),
            (None, result) if result != TransactionResult::AutoCommitted => Err(
                crate::Error::InvalidContext(format!(
                    "transaction result {result} requires a transaction id"
                )),
            ),
            _ => Ok(()),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn transaction_result(&self) -> TransactionResult {
        self.transaction_result
    }

    /// Whether HEAD publication must wait for an explicit commit.
    pub fn is_in_flight(&self) -> bool {
        self.transaction_result == TransactionResult::InFlight
    }
}

fn non_blank(field: &str, value: Option<&str>) -> crate::Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Err(crate::Error::InvalidContext(format!(
            "{field} must not be blank"
        ))),
        Some(v) => Ok(Some(v.to_string())),
    }
}
