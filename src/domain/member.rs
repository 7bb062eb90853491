//! Member record.

use crate::domain::{Decimal, MemberId, Slot, TimeMs};
use serde::{Deserialize, Serialize};

/// A hub member: referral linkage, tree placement, and live counters.
///
/// `referrer_id` is the referral-graph parent (who recruited the member);
/// `slot` is the placement-tree position, which may sit under a different
/// member entirely after spillover. Commission walks follow the referral
/// graph; counter and tier math follow the slot tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Unique member identifier.
    pub member_id: MemberId,
    /// Direct referrer in the referral graph, if any.
    pub referrer_id: Option<MemberId>,
    /// Placement-tree slot, set once by allocation and never vacated.
    pub slot: Option<Slot>,
    /// Subscription currently active.
    pub active: bool,
    /// Active members in this member's six-level slot subtree.
    pub active_descendants: i64,
    /// All members ever placed in this member's six-level slot subtree.
    pub total_descendants: i64,
    /// Members directly referred by this member.
    pub direct_referrals: i64,
    /// Cached commission rate; recomputed from `active_descendants`.
    pub commission_rate: Decimal,
    /// Cached structure number (1..=6), recomputed with the rate.
    pub structure_no: i64,
    /// Subscription volume accumulated since the last monthly cycle.
    pub monthly_volume: Decimal,
    /// Destination account on the payment rail, if configured.
    pub payout_destination: Option<String>,
    /// Signup time.
    pub created_at: TimeMs,
}

impl Member {
    /// Create a fresh member at signup: inactive, unplaced, zero counters.
    pub fn new(member_id: MemberId, referrer_id: Option<MemberId>) -> Self {
        Self {
            member_id,
            referrer_id,
            slot: None,
            active: false,
            active_descendants: 0,
            total_descendants: 0,
            direct_referrals: 0,
            commission_rate: Decimal::zero(),
            structure_no: 1,
            monthly_volume: Decimal::zero(),
            payout_destination: None,
            created_at: TimeMs::now(),
        }
    }

    /// Payout qualification: enough direct referrals.
    pub fn is_qualified(&self, min_directs: i64) -> bool {
        self.direct_referrals >= min_directs
    }
}
