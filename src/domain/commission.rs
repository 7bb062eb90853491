//! Commission ledger entries.

use crate::domain::{Decimal, MemberId, TimeMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What earned the commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    /// Fixed bonus to the direct referrer on a member's first payment.
    DirectBonus,
    /// Per-payment share to a referral-graph ancestor.
    Residual,
    /// Monthly volume share credited by the cycle processor.
    ResidualMonthly,
    /// Operator-created adjustment.
    Manual,
}

impl CommissionKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionKind::DirectBonus => "direct_bonus",
            CommissionKind::Residual => "residual",
            CommissionKind::ResidualMonthly => "residual_monthly",
            CommissionKind::Manual => "manual",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct_bonus" => Some(CommissionKind::DirectBonus),
            "residual" => Some(CommissionKind::Residual),
            "residual_monthly" => Some(CommissionKind::ResidualMonthly),
            "manual" => Some(CommissionKind::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger entry lifecycle.
///
/// `pending -> paid | cancelled | failed`; `failed -> pending` on requeue
/// while retries remain, `failed -> cancelled` once they run out. `paid`
/// and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Cancelled,
    Failed,
}

impl CommissionStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
            CommissionStatus::Failed => "failed",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CommissionStatus::Pending),
            "paid" => Some(CommissionStatus::Paid),
            "cancelled" => Some(CommissionStatus::Cancelled),
            "failed" => Some(CommissionStatus::Failed),
            _ => None,
        }
    }

    /// Whether the status machine permits moving to `to`.
    pub fn can_transition(&self, to: CommissionStatus) -> bool {
        use CommissionStatus::*;
        matches!(
            (self, to),
            (Pending, Paid) | (Pending, Cancelled) | (Pending, Failed) | (Failed, Pending) | (Failed, Cancelled)
        )
    }
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A commission computed by the engine but not yet persisted.
///
/// `(source_event_id, beneficiary_id, kind)` is the ledger's uniqueness
/// key, so re-deriving drafts from a replayed event inserts nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionDraft {
    /// Event that earned the commission (payment event key, cycle tag, ...).
    pub source_event_id: String,
    /// Member credited.
    pub beneficiary_id: MemberId,
    /// What earned it.
    pub kind: CommissionKind,
    /// Amount, already rounded to cents.
    pub amount: Decimal,
}

/// A persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionEntry {
    /// Ledger row id.
    pub entry_id: String,
    /// Event that earned the commission.
    pub source_event_id: String,
    /// Member credited.
    pub beneficiary_id: MemberId,
    /// What earned it.
    pub kind: CommissionKind,
    /// Amount.
    pub amount: Decimal,
    /// Lifecycle status.
    pub status: CommissionStatus,
    /// Transfer attempts that have failed so far.
    pub retry_count: i64,
    /// Batch the entry is assigned to, while batched.
    pub batch_id: Option<String>,
    /// Rail receipt reference once paid.
    pub external_ref: Option<String>,
    /// Last failure reason, if any.
    pub error_reason: Option<String>,
    /// Creation time.
    pub created_at: TimeMs,
    /// Last status change.
    pub updated_at: TimeMs,
}

impl CommissionEntry {
    /// Materialize a draft as a pending ledger entry with a fresh id.
    pub fn from_draft(draft: CommissionDraft, now: TimeMs) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            source_event_id: draft.source_event_id,
            beneficiary_id: draft.beneficiary_id,
            kind: draft.kind,
            amount: draft.amount,
            status: CommissionStatus::Pending,
            retry_count: 0,
            batch_id: None,
            external_ref: None,
            error_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
