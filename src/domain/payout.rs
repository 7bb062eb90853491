//! Payout batches.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};

/// Batch lifecycle: `pending -> approved -> processing -> completed`.
///
/// Any non-terminal state may move to `failed`; a batch stuck in
/// `processing` is only ever resolved by an explicit operator action,
/// never by an automatic timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Approved,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Approved => "approved",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BatchStatus::Pending),
            "approved" => Some(BatchStatus::Approved),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    /// Whether the status machine permits moving to `to`.
    pub fn can_transition(&self, to: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, to) {
            (Pending, Approved) | (Approved, Processing) | (Processing, Completed) => true,
            (Pending | Approved | Processing, Failed) => true,
            _ => false,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A group of pending commission entries scheduled for transfer together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutBatch {
    /// Batch id.
    pub batch_id: String,
    /// Lifecycle status.
    pub status: BatchStatus,
    /// Sum of member amounts planned into the batch.
    pub total_amount: Decimal,
    /// Number of ledger entries in the batch.
    pub entry_count: i64,
    /// Creation time.
    pub created_at: TimeMs,
    /// Last status change.
    pub updated_at: TimeMs,
}
