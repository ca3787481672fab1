//! Wire models for the TzKT delegation endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tzdeleg_core::Amount;

/// Operation status as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Applied,
    Failed,
    Backtracked,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Backtracked => "backtracked",
            Self::Skipped => "skipped",
            Self::Unknown => "unknown",
        }
    }
}

/// An account reference (`sender`, `newDelegate`, `prevDelegate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccount {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// One delegation operation as returned by `/v1/operations/delegations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDelegation {
    /// Source-internal id; the pagination sort key.
    pub id: i64,
    pub level: i64,
    pub timestamp: DateTime<Utc>,
    pub block: String,
    pub hash: String,
    pub sender: RawAccount,
    #[serde(default)]
    pub new_delegate: Option<RawAccount>,
    #[serde(default)]
    pub prev_delegate: Option<RawAccount>,
    pub amount: Amount,
    pub status: OperationStatus,
}
