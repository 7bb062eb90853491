//! Gateway event intake: payments and subscription changes.
//!
//! Webhooks arrive at-least-once, so every step here is either naturally
//! idempotent (conditional activation flip, unique-keyed ledger inserts)
//! or guarded by the event-key insert (volume accrual, which rolls back
//! for a replayed key). The ordering matters: the idempotent steps run
//! first so a crash mid-way is healed by redelivery instead of losing or
//! doubling money.

use crate::db::Repository;
use crate::domain::{Decimal, MemberId, PaymentEvent, SubscriptionEvent};
use crate::engine::{ActiveCountPropagator, CommissionEngine};
use crate::notify::{Notice, Notifier};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone)]
pub struct PaymentProcessor {
    repo: Arc<Repository>,
    engine: CommissionEngine,
    propagator: ActiveCountPropagator,
    notifier: Arc<dyn Notifier>,
}

impl PaymentProcessor {
    pub fn new(
        repo: Arc<Repository>,
        engine: CommissionEngine,
        propagator: ActiveCountPropagator,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repo,
            engine,
            propagator,
            notifier,
        }
    }

    /// Process one confirmed payment: activate the payer if needed,
    /// credit commissions up the referral chain, and accrue the amount
    /// into every ancestor's monthly volume.
    pub async fn handle_payment(
        &self,
        event: &PaymentEvent,
    ) -> Result<PaymentOutcome, IntakeError> {
        if self.repo.get_member(&event.member_id).await?.is_none() {
            return Err(IntakeError::MemberNotFound(event.member_id.clone()));
        }

        // A confirmed payment implies a live subscription. The conditional
        // flip means a replay cannot propagate the activation twice.
        let activated = self.repo.mark_active(&event.member_id).await?;
        if activated {
            self.propagator.apply_change(&event.member_id, 1).await?;
        }

        let chain = self.repo.referral_chain(&event.member_id).await?;
        let drafts = self.engine.distribute(event, &chain);
        let entries = self.repo.record_commissions(&drafts).await?;

        // The ledger inserts above dedupe on their own key; the volume
        // accrual does not, so it rides on the event-key insert and is
        // rolled back whole when the key was already seen.
        let accruals: Vec<(MemberId, Decimal)> = chain
            .iter()
            .map(|ancestor| (ancestor.member_id.clone(), event.amount))
            .collect();
        let first_delivery = self.repo.record_payment_event(event, &accruals).await?;

        if first_delivery {
            info!(
                member = %event.member_id,
                event_key = %event.event_key,
                kind = %event.kind,
                amount = %event.amount,
                entries = entries.len(),
                activated,
                "Processed payment event"
            );
        } else {
            info!(
                member = %event.member_id,
                event_key = %event.event_key,
                "Replayed payment event, nothing new to apply"
            );
        }

        for entry in &entries {
            self.spawn_notice(Notice::CommissionEarned {
                member_id: entry.beneficiary_id.clone(),
                amount: entry.amount,
                kind: entry.kind,
                source_event_id: entry.source_event_id.clone(),
            });
        }

        Ok(PaymentOutcome {
            duplicate: !first_delivery,
            activated,
            entries_created: entries.len(),
        })
    }

    /// Apply a gateway-reported subscription state. The conditional flip
    /// decides whether anything propagates; the audit row decides whether
    /// the delivery was a replay.
    pub async fn handle_subscription(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<SubscriptionOutcome, IntakeError> {
        if self.repo.get_member(&event.member_id).await?.is_none() {
            return Err(IntakeError::MemberNotFound(event.member_id.clone()));
        }

        let changed = if event.active {
            self.repo.mark_active(&event.member_id).await?
        } else {
            self.repo.mark_inactive(&event.member_id).await?
        };
        if changed {
            let delta = if event.active { 1 } else { -1 };
            self.propagator.apply_change(&event.member_id, delta).await?;
        }

        let first_delivery = self.repo.record_subscription_event(event).await?;
        info!(
            member = %event.member_id,
            active = event.active,
            changed,
            "Processed subscription event"
        );

        Ok(SubscriptionOutcome {
            duplicate: !changed && !first_delivery,
            changed,
        })
    }

    fn spawn_notice(&self, notice: Notice) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.send(&notice).await {
                warn!(error = %err, "Notice delivery failed");
            }
        });
    }
}

#[derive(Debug)]
pub struct PaymentOutcome {
    pub duplicate: bool,
    pub activated: bool,
    pub entries_created: usize,
}

#[derive(Debug)]
pub struct SubscriptionOutcome {
    pub duplicate: bool,
    pub changed: bool,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
