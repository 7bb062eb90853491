//! Tiered commission rates and per-event distribution.
//!
//! The engine is pure: it turns an event plus the relevant members into
//! commission drafts, and never touches the database. Persistence and
//! dedup belong to the ledger.

use crate::domain::{
    CommissionDraft, CommissionKind, Decimal, Member, PaymentEvent, PaymentKind, Period,
    STRUCTURE_CAPACITY,
};
use rust_decimal::Decimal as RustDecimal;

/// Tier ladder: how completed structures translate into a personal rate.
///
/// The ladder is configuration, not code: base rate, step per completed
/// structure, and the structure count cap are all adjustable without
/// touching the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CommissionSchedule {
    /// Rate with no completed structure.
    pub base_rate: Decimal,
    /// Rate added per completed structure.
    pub step_rate: Decimal,
    /// Completed structures counted toward the rate, and the highest
    /// structure number reported.
    pub max_structures: i64,
    /// Active descendants per completed structure.
    pub structure_size: i64,
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self {
            base_rate: Decimal::new(RustDecimal::new(1, 1)),
            step_rate: Decimal::new(RustDecimal::new(1, 2)),
            max_structures: 6,
            structure_size: STRUCTURE_CAPACITY as i64,
        }
    }
}

impl CommissionSchedule {
    /// Personal commission rate for an active-descendant count.
    pub fn rate_for(&self, active_count: i64) -> Decimal {
        let completed = (active_count / self.structure_size).min(self.max_structures);
        self.base_rate + self.step_rate * Decimal::from(completed)
    }

    /// Structure currently being filled, 1..=max.
    pub fn structure_number_for(&self, active_count: i64) -> i64 {
        (active_count / self.structure_size + 1).min(self.max_structures)
    }
}

/// Per-event distribution parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPolicy {
    /// Flat bonus to the direct referrer on a first payment.
    pub direct_bonus_amount: Decimal,
    /// Share of a recurring payment each referral ancestor receives.
    pub residual_share_rate: Decimal,
    /// Ceiling on the summed residuals per event, as a share of the
    /// payment amount.
    pub residual_budget_rate: Decimal,
}

impl Default for DistributionPolicy {
    fn default() -> Self {
        Self {
            direct_bonus_amount: Decimal::new(RustDecimal::from(25)),
            residual_share_rate: Decimal::new(RustDecimal::new(1, 2)),
            residual_budget_rate: Decimal::new(RustDecimal::new(1, 1)),
        }
    }
}

/// Computes commission drafts from payment events and cycle volume.
#[derive(Debug, Clone, Default)]
pub struct CommissionEngine {
    schedule: CommissionSchedule,
    policy: DistributionPolicy,
}

impl CommissionEngine {
    pub fn new(schedule: CommissionSchedule, policy: DistributionPolicy) -> Self {
        Self { schedule, policy }
    }

    pub fn schedule(&self) -> &CommissionSchedule {
        &self.schedule
    }

    /// Drafts earned by a payment event.
    ///
    /// A first payment earns the direct referrer a flat bonus; a recurring
    /// payment earns each referral ancestor a residual share, nearest
    /// ancestor first, until the per-event budget is spent. Qualification
    /// is not checked here: unqualified beneficiaries still accrue pending
    /// entries, and the payout planner holds them back.
    pub fn distribute(&self, event: &PaymentEvent, chain: &[Member]) -> Vec<CommissionDraft> {
        match event.kind {
            PaymentKind::First => self.direct_bonus(event, chain),
            PaymentKind::Recurring => self.residuals(event, chain),
        }
    }

    fn direct_bonus(&self, event: &PaymentEvent, chain: &[Member]) -> Vec<CommissionDraft> {
        let Some(referrer) = chain.first() else {
            return Vec::new();
        };
        vec![CommissionDraft {
            source_event_id: event.event_key.clone(),
            beneficiary_id: referrer.member_id.clone(),
            kind: CommissionKind::DirectBonus,
            amount: self.policy.direct_bonus_amount.round_cents(),
        }]
    }

    fn residuals(&self, event: &PaymentEvent, chain: &[Member]) -> Vec<CommissionDraft> {
        let share = (event.amount * self.policy.residual_share_rate).round_cents();
        let budget = (event.amount * self.policy.residual_budget_rate).round_cents();

        let mut drafts = Vec::new();
        let mut spent = Decimal::zero();
        for ancestor in chain {
            let remaining = budget - spent;
            if !remaining.is_positive() {
                break;
            }
            let amount = share.min(remaining);
            if !amount.is_positive() {
                break;
            }
            spent = spent + amount;
            drafts.push(CommissionDraft {
                source_event_id: event.event_key.clone(),
                beneficiary_id: ancestor.member_id.clone(),
                kind: CommissionKind::Residual,
                amount,
            });
        }
        drafts
    }

    /// Monthly residual draft for one member's archived volume, at the
    /// member's tiered rate. Returns `None` when nothing would be credited.
    pub fn monthly_residual(
        &self,
        member: &Member,
        archived_volume: Decimal,
        period: &Period,
    ) -> Option<CommissionDraft> {
        let rate = self.schedule.rate_for(member.active_descendants);
        let amount = (archived_volume * rate).round_cents();
        if !amount.is_positive() {
            return None;
        }
        Some(CommissionDraft {
            source_event_id: format!("cycle:{}", period),
            beneficiary_id: member.member_id.clone(),
            kind: CommissionKind::ResidualMonthly,
            amount,
        })
    }
}
