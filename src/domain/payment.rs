//! Gateway events: subscription payments and status changes.

use crate::domain::{Decimal, MemberId, TimeMs};
use serde::{Deserialize, Serialize};

/// Whether a payment is the member's first or a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// First-ever subscription payment; triggers the direct bonus.
    First,
    /// Renewal payment; triggers residual distribution.
    Recurring,
}

impl PaymentKind {
    /// Stable string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::First => "first",
            PaymentKind::Recurring => "recurring",
        }
    }
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(PaymentKind::First),
            "recurring" => Ok(PaymentKind::Recurring),
            other => Err(format!("unknown payment kind '{}'", other)),
        }
    }
}

/// A subscription payment delivered by the gateway, possibly more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Stable unique identifier for this event.
    ///
    /// Priority: gateway event id (if present) > hash of deterministic fields.
    pub event_key: String,
    /// Paying member.
    pub member_id: MemberId,
    /// Payment amount.
    pub amount: Decimal,
    /// First or recurring.
    pub kind: PaymentKind,
    /// Gateway timestamp in milliseconds since Unix epoch.
    pub time_ms: TimeMs,
    /// Raw gateway event id when the gateway supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_event_id: Option<String>,
}

impl PaymentEvent {
    /// Create a new PaymentEvent and compute its `event_key`.
    pub fn new(
        member_id: MemberId,
        amount: Decimal,
        kind: PaymentKind,
        time_ms: TimeMs,
        gateway_event_id: Option<String>,
    ) -> Self {
        let gateway_event_id = normalize_event_id(gateway_event_id);
        let event_key = match &gateway_event_id {
            Some(id) => id.clone(),
            None => hashed_key(&[
                member_id.as_str(),
                &time_ms.as_ms().to_string(),
                &amount.to_canonical_string(),
                kind.as_str(),
            ]),
        };
        Self {
            event_key,
            member_id,
            amount,
            kind,
            time_ms,
            gateway_event_id,
        }
    }
}

/// A subscription status change delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    /// Stable unique identifier for this event.
    pub event_key: String,
    /// Affected member.
    pub member_id: MemberId,
    /// Target subscription state.
    pub active: bool,
    /// Gateway timestamp in milliseconds since Unix epoch.
    pub time_ms: TimeMs,
    /// Raw gateway event id when the gateway supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_event_id: Option<String>,
}

impl SubscriptionEvent {
    /// Create a new SubscriptionEvent and compute its `event_key`.
    pub fn new(
        member_id: MemberId,
        active: bool,
        time_ms: TimeMs,
        gateway_event_id: Option<String>,
    ) -> Self {
        let gateway_event_id = normalize_event_id(gateway_event_id);
        let event_key = match &gateway_event_id {
            Some(id) => id.clone(),
            None => hashed_key(&[
                member_id.as_str(),
                &time_ms.as_ms().to_string(),
                if active { "active" } else { "inactive" },
            ]),
        };
        Self {
            event_key,
            member_id,
            active,
            time_ms,
            gateway_event_id,
        }
    }
}

/// Compute a stable fallback key over length-prefixed fields.
///
/// Gateway ids are case-sensitive opaque strings, so they pass through
/// untouched; the fallback truncates SHA-256 to 128 bits, which is plenty
/// of collision resistance for per-member event counts.
fn hashed_key(fields: &[&str]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u32).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    let hash = hasher.finalize();
    format!("hash:{}", hex::encode(&hash[..16]))
}

fn normalize_event_id(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
