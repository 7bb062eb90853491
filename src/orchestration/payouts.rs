//! Batched payout planning and execution.
//!
//! Planning groups pending entries per beneficiary and applies the payout
//! policy; execution moves money one beneficiary group at a time over the
//! rail. The `approved -> processing` transition is the single-flight
//! guard: whatever else races a batch, only one runner ever transfers.

use crate::db::Repository;
use crate::domain::{
    BatchStatus, CommissionEntry, CommissionStatus, Decimal, MemberId, PayoutBatch, TimeMs,
};
use crate::notify::{Notice, Notifier};
use crate::rail::PaymentRail;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Thresholds and bounds applied when planning and retrying payouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutPolicy {
    /// Minimum pending total before a beneficiary is paid at all.
    pub min_payout_threshold: Decimal,
    /// Ceiling on a single beneficiary's total within one batch; entries
    /// beyond it wait for the next batch.
    pub max_payout_amount: Decimal,
    /// Direct referrals required before any payout is released.
    pub qualification_min_directs: i64,
    /// Transfer attempts per entry before it is cancelled for review.
    pub max_transfer_retries: i64,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            min_payout_threshold: Decimal::from(50),
            max_payout_amount: Decimal::from(10_000),
            qualification_min_directs: 3,
            max_transfer_retries: 3,
        }
    }
}

#[derive(Clone)]
pub struct PayoutOrchestrator {
    repo: Arc<Repository>,
    rail: Arc<dyn PaymentRail>,
    notifier: Arc<dyn Notifier>,
    policy: PayoutPolicy,
}

impl PayoutOrchestrator {
    pub fn new(
        repo: Arc<Repository>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
        policy: PayoutPolicy,
    ) -> Self {
        Self {
            repo,
            rail,
            notifier,
            policy,
        }
    }

    /// Sweep retryable entries back in, group what is pending, and create
    /// a new batch from the groups that pass the policy. Returns a plan
    /// summary whether or not a batch was created.
    pub async fn plan_batch(&self) -> Result<BatchPlan, PayoutError> {
        let requeued = self.repo.requeue_failed(self.policy.max_transfer_retries).await?;
        let cancelled = self.repo.cancel_exhausted(self.policy.max_transfer_retries).await?;
        if cancelled > 0 {
            error!(cancelled, "Cancelled entries out of retries, manual review needed");
        }

        let mut groups: BTreeMap<MemberId, Vec<CommissionEntry>> = BTreeMap::new();
        for entry in self.repo.pending_unbatched().await? {
            groups.entry(entry.beneficiary_id.clone()).or_default().push(entry);
        }

        // one member lookup per beneficiary, issued concurrently
        let beneficiary_ids: Vec<MemberId> = groups.keys().cloned().collect();
        let members =
            try_join_all(beneficiary_ids.iter().map(|id| self.repo.get_member(id))).await?;

        let mut plan = BatchPlan {
            batch_id: None,
            entry_count: 0,
            beneficiary_count: 0,
            total_amount: Decimal::zero(),
            requeued,
            cancelled,
            held_unqualified: 0,
            held_below_threshold: 0,
            deferred_over_cap: 0,
        };
        let mut selected: Vec<CommissionEntry> = Vec::new();

        for (member, (beneficiary, mut entries)) in members.into_iter().zip(groups.into_iter()) {
            let qualified = match member {
                Some(ref m) => m.direct_referrals >= self.policy.qualification_min_directs,
                None => {
                    warn!(beneficiary = %beneficiary, "Entries for a missing member row, holding them");
                    false
                }
            };
            if !qualified {
                plan.held_unqualified += 1;
                continue;
            }

            let full_total = entries
                .iter()
                .fold(Decimal::zero(), |acc, e| acc + e.amount);
            if full_total < self.policy.min_payout_threshold {
                plan.held_below_threshold += 1;
                continue;
            }

            // entries are oldest first; stop at the first one that would
            // push the group past the cap so payment order stays FIFO
            let mut cut = entries.len();
            let mut group_total = Decimal::zero();
            for (i, entry) in entries.iter().enumerate() {
                let next = group_total + entry.amount;
                if next > self.policy.max_payout_amount {
                    cut = i;
                    break;
                }
                group_total = next;
            }
            if cut == 0 {
                warn!(
                    beneficiary = %beneficiary,
                    amount = %entries[0].amount,
                    "Oldest entry alone exceeds the batch cap, holding the group"
                );
                plan.deferred_over_cap += entries.len();
                continue;
            }
            plan.deferred_over_cap += entries.len() - cut;
            entries.truncate(cut);

            plan.beneficiary_count += 1;
            plan.total_amount = plan.total_amount + group_total;
            selected.append(&mut entries);
        }

        if selected.is_empty() {
            info!(requeued, cancelled, "Planned no payout batch, nothing eligible");
            return Ok(plan);
        }

        let now = TimeMs::now();
        let batch = PayoutBatch {
            batch_id: Uuid::new_v4().to_string(),
            status: BatchStatus::Pending,
            total_amount: plan.total_amount,
            entry_count: selected.len() as i64,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_batch(&batch).await?;

        let entry_ids: Vec<String> = selected.iter().map(|e| e.entry_id.clone()).collect();
        let assigned = self.repo.assign_entries_to_batch(&entry_ids, &batch.batch_id).await?;
        plan.entry_count = assigned as usize;

        if plan.entry_count != entry_ids.len() {
            // a concurrent plan grabbed some of the entries first
            warn!(
                batch = %batch.batch_id,
                planned = entry_ids.len(),
                assigned,
                "Entries were taken by a concurrent plan, recomputing batch totals"
            );
            let actual = self.repo.entries_for_batch(&batch.batch_id).await?;
            plan.total_amount = actual
                .iter()
                .fold(Decimal::zero(), |acc, e| acc + e.amount);
            self.repo
                .update_batch_totals(&batch.batch_id, plan.total_amount, actual.len() as i64)
                .await?;
        }

        info!(
            batch = %batch.batch_id,
            entries = plan.entry_count,
            beneficiaries = plan.beneficiary_count,
            total = %plan.total_amount,
            "Planned payout batch"
        );
        plan.batch_id = Some(batch.batch_id);
        Ok(plan)
    }

    /// Release a planned batch for execution.
    pub async fn approve_batch(&self, batch_id: &str) -> Result<(), PayoutError> {
        if self
            .repo
            .transition_batch(batch_id, BatchStatus::Pending, BatchStatus::Approved)
            .await?
        {
            info!(batch = %batch_id, "Approved payout batch");
            return Ok(());
        }
        Err(self.state_error(batch_id, BatchStatus::Pending).await?)
    }

    /// Execute an approved batch: one rail transfer per beneficiary group,
    /// entries marked paid or failed as each transfer lands. The batch
    /// ends `completed` only when every group went through.
    pub async fn run_batch(&self, batch_id: &str) -> Result<BatchReport, PayoutError> {
        if !self
            .repo
            .transition_batch(batch_id, BatchStatus::Approved, BatchStatus::Processing)
            .await?
        {
            return Err(self.state_error(batch_id, BatchStatus::Approved).await?);
        }
        info!(batch = %batch_id, "Running payout batch");

        let mut entries = self.repo.entries_for_batch(batch_id).await?;
        entries.retain(|entry| {
            // an entry cancelled between plan and run must not be paid
            if entry.status != CommissionStatus::Pending {
                warn!(entry = %entry.entry_id, status = %entry.status, "Skipping non-pending entry in batch");
                return false;
            }
            true
        });

        let mut report = BatchReport {
            batch_id: batch_id.to_string(),
            transfers: 0,
            paid_entries: 0,
            failed_entries: 0,
            total_paid: Decimal::zero(),
        };

        let mut start = 0usize;
        while start < entries.len() {
            let beneficiary = entries[start].beneficiary_id.clone();
            let mut end = start;
            while end < entries.len() && entries[end].beneficiary_id == beneficiary {
                end += 1;
            }
            self.pay_group(batch_id, &entries[start..end], &mut report).await?;
            start = end;
        }

        let terminal = if report.failed_entries == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };
        if !self
            .repo
            .transition_batch(batch_id, BatchStatus::Processing, terminal)
            .await?
        {
            warn!(batch = %batch_id, "Batch left processing state mid-run, not finalizing");
        }
        info!(
            batch = %batch_id,
            status = %terminal,
            transfers = report.transfers,
            paid = report.paid_entries,
            failed = report.failed_entries,
            total = %report.total_paid,
            "Finished payout batch"
        );
        Ok(report)
    }

    /// Approve and run in one step. Re-triggering a batch that is already
    /// being worked on surfaces `BatchAlreadyProcessing` instead of a
    /// second run.
    pub async fn trigger_batch(&self, batch_id: &str) -> Result<BatchReport, PayoutError> {
        self.repo
            .transition_batch(batch_id, BatchStatus::Pending, BatchStatus::Approved)
            .await?;
        self.run_batch(batch_id).await
    }

    /// Operator resolution for a batch stuck in `processing` (runner
    /// crashed mid-flight): mark it failed and release the entries that
    /// never reached the rail. Paid entries keep their state and tag.
    pub async fn resolve_stuck_batch(&self, batch_id: &str) -> Result<ResolveReport, PayoutError> {
        if !self
            .repo
            .transition_batch(batch_id, BatchStatus::Processing, BatchStatus::Failed)
            .await?
        {
            return Err(self.state_error(batch_id, BatchStatus::Processing).await?);
        }
        let released = self.repo.detach_pending_from_batch(batch_id).await?;
        warn!(batch = %batch_id, released, "Operator resolved stuck batch as failed");
        Ok(ResolveReport {
            batch_id: batch_id.to_string(),
            released,
        })
    }

    async fn pay_group(
        &self,
        batch_id: &str,
        group: &[CommissionEntry],
        report: &mut BatchReport,
    ) -> Result<(), sqlx::Error> {
        let beneficiary = &group[0].beneficiary_id;
        let total = group
            .iter()
            .fold(Decimal::zero(), |acc, e| acc + e.amount);

        let destination = self
            .repo
            .get_member(beneficiary)
            .await?
            .and_then(|m| m.payout_destination);
        let Some(destination) = destination else {
            warn!(batch = %batch_id, beneficiary = %beneficiary, "No payout destination, failing the group");
            self.fail_group(group, "no payout destination", report).await?;
            self.spawn_notice(Notice::PayoutFailed {
                member_id: beneficiary.clone(),
                amount: total,
                reason: "no payout destination".to_string(),
            });
            return Ok(());
        };

        // Stable per batch/beneficiary so a retried call after a lost
        // response cannot double-pay on a deduping rail.
        let reference = format!("{}:{}", batch_id, beneficiary);
        match self.rail.transfer(&destination, total, &reference).await {
            Ok(receipt) => {
                for entry in group {
                    if self.repo.mark_entry_paid(&entry.entry_id, &receipt.external_ref).await? {
                        report.paid_entries += 1;
                    } else {
                        warn!(entry = %entry.entry_id, "Entry left pending mid-run, not marking paid");
                    }
                }
                report.transfers += 1;
                report.total_paid = report.total_paid + total;
                info!(
                    batch = %batch_id,
                    beneficiary = %beneficiary,
                    amount = %total,
                    external_ref = %receipt.external_ref,
                    "Group paid out"
                );
                self.spawn_notice(Notice::PayoutCompleted {
                    member_id: beneficiary.clone(),
                    amount: total,
                    external_ref: receipt.external_ref,
                });
            }
            Err(err) => {
                warn!(
                    batch = %batch_id,
                    beneficiary = %beneficiary,
                    error = %err,
                    "Transfer failed, failing the group"
                );
                self.fail_group(group, &err.to_string(), report).await?;
                self.spawn_notice(Notice::PayoutFailed {
                    member_id: beneficiary.clone(),
                    amount: total,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn fail_group(
        &self,
        group: &[CommissionEntry],
        reason: &str,
        report: &mut BatchReport,
    ) -> Result<(), sqlx::Error> {
        for entry in group {
            if self.repo.mark_entry_failed(&entry.entry_id, reason).await? {
                report.failed_entries += 1;
            }
        }
        Ok(())
    }

    async fn state_error(
        &self,
        batch_id: &str,
        expected: BatchStatus,
    ) -> Result<PayoutError, sqlx::Error> {
        Ok(match self.repo.get_batch(batch_id).await? {
            None => PayoutError::BatchNotFound(batch_id.to_string()),
            Some(batch)
                if batch.status == BatchStatus::Processing
                    && expected != BatchStatus::Processing =>
            {
                PayoutError::BatchAlreadyProcessing(batch_id.to_string())
            }
            Some(batch) => PayoutError::WrongBatchState {
                batch_id: batch_id.to_string(),
                status: batch.status,
                expected,
            },
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

/// What a planning pass did and held back.
#[derive(Debug)]
pub struct BatchPlan {
    /// None when nothing was eligible and no batch was created.
    pub batch_id: Option<String>,
    pub entry_count: usize,
    pub beneficiary_count: usize,
    pub total_amount: Decimal,
    pub requeued: u64,
    pub cancelled: u64,
    pub held_unqualified: usize,
    pub held_below_threshold: usize,
    pub deferred_over_cap: usize,
}

#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: String,
    pub transfers: usize,
    pub paid_entries: usize,
    pub failed_entries: usize,
    pub total_paid: Decimal,
}

#[derive(Debug)]
pub struct ResolveReport {
    pub batch_id: String,
    pub released: u64,
}

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("batch {0} not found")]
    BatchNotFound(String),
    #[error("batch {0} is already processing")]
    BatchAlreadyProcessing(String),
    #[error("batch {batch_id} is {status}, expected {expected}")]
    WrongBatchState {
        batch_id: String,
        status: BatchStatus,
        expected: BatchStatus,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{CommissionDraft, CommissionKind, CommissionStatus, Member};
    use crate::notify::MockNotifier;
    use crate::rail::MockPaymentRail;
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn setup_with_rail(
        policy: PayoutPolicy,
        rail: MockPaymentRail,
    ) -> (PayoutOrchestrator, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let orchestrator = PayoutOrchestrator::new(
            repo.clone(),
            Arc::new(rail),
            Arc::new(MockNotifier::new()),
            policy,
        );
        (orchestrator, repo, temp_dir)
    }

    async fn setup(policy: PayoutPolicy) -> (PayoutOrchestrator, Arc<Repository>, MockPaymentRail, TempDir) {
        let rail = MockPaymentRail::new();
        let (orchestrator, repo, temp_dir) = setup_with_rail(policy, rail.clone()).await;
        (orchestrator, repo, rail, temp_dir)
    }

    fn id(s: &str) -> MemberId {
        MemberId::new(s.to_string())
    }

    async fn add_member(repo: &Repository, member_id: &str, directs: i64, destination: Option<&str>) {
        let mut member = Member::new(id(member_id), None);
        member.direct_referrals = directs;
        member.payout_destination = destination.map(str::to_string);
        repo.insert_member(&member).await.unwrap();
    }

    async fn credit(repo: &Repository, beneficiary: &str, event: &str, amount: &str) -> String {
        let inserted = repo
            .record_commissions(&[CommissionDraft {
                source_event_id: event.to_string(),
                beneficiary_id: id(beneficiary),
                kind: CommissionKind::Residual,
                amount: Decimal::from_str(amount).unwrap(),
            }])
            .await
            .unwrap();
        inserted[0].entry_id.clone()
    }

    #[tokio::test]
    async fn test_plan_holds_unqualified_and_small_groups() {
        let (orchestrator, repo, _rail, _temp) = setup(PayoutPolicy::default()).await;

        add_member(&repo, "q", 3, Some("acct_q")).await;
        add_member(&repo, "u", 0, Some("acct_u")).await;
        add_member(&repo, "s", 3, Some("acct_s")).await;
        credit(&repo, "q", "evt_1", "40").await;
        credit(&repo, "q", "evt_2", "20").await;
        credit(&repo, "u", "evt_3", "100").await;
        credit(&repo, "s", "evt_4", "10").await;

        let plan = orchestrator.plan_batch().await.unwrap();
        assert!(plan.batch_id.is_some());
        assert_eq!(plan.entry_count, 2);
        assert_eq!(plan.beneficiary_count, 1);
        assert_eq!(plan.total_amount, Decimal::from_str("60").unwrap());
        assert_eq!(plan.held_unqualified, 1);
        assert_eq!(plan.held_below_threshold, 1);
    }

    #[tokio::test]
    async fn test_plan_caps_group_and_defers_the_rest() {
        let policy = PayoutPolicy {
            max_payout_amount: Decimal::from(100),
            ..PayoutPolicy::default()
        };
        let (orchestrator, repo, _rail, _temp) = setup(policy).await;

        add_member(&repo, "q", 3, Some("acct_q")).await;
        credit(&repo, "q", "evt_1", "60").await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        credit(&repo, "q", "evt_2", "50").await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        credit(&repo, "q", "evt_3", "30").await;

        let plan = orchestrator.plan_batch().await.unwrap();
        assert_eq!(plan.entry_count, 1);
        assert_eq!(plan.total_amount, Decimal::from_str("60").unwrap());
        assert_eq!(plan.deferred_over_cap, 2);

        // the deferred entries stay available for the next plan
        let pending = repo.pending_unbatched().await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_holds_oversized_single_entry() {
        let policy = PayoutPolicy {
            max_payout_amount: Decimal::from(100),
            ..PayoutPolicy::default()
        };
        let (orchestrator, repo, _rail, _temp) = setup(policy).await;

        add_member(&repo, "q", 3, Some("acct_q")).await;
        credit(&repo, "q", "evt_1", "150").await;

        let plan = orchestrator.plan_batch().await.unwrap();
        assert!(plan.batch_id.is_none());
        assert_eq!(plan.deferred_over_cap, 1);
    }

    #[tokio::test]
    async fn test_trigger_pays_groups_and_completes() {
        let (orchestrator, repo, rail, _temp) = setup(PayoutPolicy::default()).await;

        add_member(&repo, "a", 3, Some("acct_a")).await;
        add_member(&repo, "b", 3, Some("acct_b")).await;
        let a1 = credit(&repo, "a", "evt_1", "40").await;
        let a2 = credit(&repo, "a", "evt_2", "30").await;
        let b1 = credit(&repo, "b", "evt_3", "80").await;

        let plan = orchestrator.plan_batch().await.unwrap();
        let batch_id = plan.batch_id.unwrap();

        let report = orchestrator.trigger_batch(&batch_id).await.unwrap();
        assert_eq!(report.transfers, 2);
        assert_eq!(report.paid_entries, 3);
        assert_eq!(report.failed_entries, 0);
        assert_eq!(report.total_paid, Decimal::from_str("150").unwrap());

        for entry_id in [&a1, &a2, &b1] {
            let entry = repo.get_entry(entry_id).await.unwrap().unwrap();
            assert_eq!(entry.status, CommissionStatus::Paid);
            assert!(entry.external_ref.is_some());
        }
        let batch = repo.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);

        // one transfer per beneficiary, amounts grouped
        let transfers = rail.transfers();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].amount, Decimal::from_str("70").unwrap());
        assert_eq!(transfers[1].amount, Decimal::from_str("80").unwrap());
    }

    #[tokio::test]
    async fn test_retrigger_finished_batch_is_an_error() {
        let (orchestrator, repo, _rail, _temp) = setup(PayoutPolicy::default()).await;
        add_member(&repo, "a", 3, Some("acct_a")).await;
        credit(&repo, "a", "evt_1", "60").await;

        let batch_id = orchestrator.plan_batch().await.unwrap().batch_id.unwrap();
        orchestrator.trigger_batch(&batch_id).await.unwrap();

        let err = orchestrator.trigger_batch(&batch_id).await.unwrap_err();
        assert!(matches!(err, PayoutError::WrongBatchState { .. }));
    }

    #[tokio::test]
    async fn test_trigger_while_processing_conflicts() {
        let (orchestrator, repo, _rail, _temp) = setup(PayoutPolicy::default()).await;
        add_member(&repo, "a", 3, Some("acct_a")).await;
        credit(&repo, "a", "evt_1", "60").await;

        let batch_id = orchestrator.plan_batch().await.unwrap().batch_id.unwrap();
        // simulate a crashed runner holding the batch
        repo.transition_batch(&batch_id, BatchStatus::Pending, BatchStatus::Approved)
            .await
            .unwrap();
        repo.transition_batch(&batch_id, BatchStatus::Approved, BatchStatus::Processing)
            .await
            .unwrap();

        let err = orchestrator.trigger_batch(&batch_id).await.unwrap_err();
        assert!(matches!(err, PayoutError::BatchAlreadyProcessing(_)));
    }

    #[tokio::test]
    async fn test_failed_transfer_fails_batch_and_requeues_later() {
        let rail = MockPaymentRail::new().failing("acct_a");
        let (orchestrator, repo, _temp) = setup_with_rail(PayoutPolicy::default(), rail).await;

        add_member(&repo, "a", 3, Some("acct_a")).await;
        let entry_id = credit(&repo, "a", "evt_1", "60").await;

        let batch_id = orchestrator.plan_batch().await.unwrap().batch_id.unwrap();
        let report = orchestrator.trigger_batch(&batch_id).await.unwrap();
        assert_eq!(report.failed_entries, 1);
        assert_eq!(report.paid_entries, 0);

        let entry = repo.get_entry(&entry_id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Failed);
        assert_eq!(entry.retry_count, 1);
        let batch = repo.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);

        // the next plan sweeps the entry back in
        let plan = orchestrator.plan_batch().await.unwrap();
        assert_eq!(plan.requeued, 1);
        assert_eq!(plan.entry_count, 1);
    }

    #[tokio::test]
    async fn test_missing_destination_fails_group() {
        let (orchestrator, repo, _rail, _temp) = setup(PayoutPolicy::default()).await;
        add_member(&repo, "a", 3, None).await;
        let entry_id = credit(&repo, "a", "evt_1", "60").await;

        let batch_id = orchestrator.plan_batch().await.unwrap().batch_id.unwrap();
        let report = orchestrator.trigger_batch(&batch_id).await.unwrap();
        assert_eq!(report.failed_entries, 1);

        let entry = repo.get_entry(&entry_id).await.unwrap().unwrap();
        assert_eq!(entry.error_reason.as_deref(), Some("no payout destination"));
    }

    #[tokio::test]
    async fn test_resolve_stuck_batch_releases_pending_entries() {
        let (orchestrator, repo, _rail, _temp) = setup(PayoutPolicy::default()).await;
        add_member(&repo, "a", 3, Some("acct_a")).await;
        let entry_id = credit(&repo, "a", "evt_1", "60").await;

        let batch_id = orchestrator.plan_batch().await.unwrap().batch_id.unwrap();
        repo.transition_batch(&batch_id, BatchStatus::Pending, BatchStatus::Approved)
            .await
            .unwrap();
        repo.transition_batch(&batch_id, BatchStatus::Approved, BatchStatus::Processing)
            .await
            .unwrap();

        let resolved = orchestrator.resolve_stuck_batch(&batch_id).await.unwrap();
        assert_eq!(resolved.released, 1);

        let batch = repo.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        let entry = repo.get_entry(&entry_id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Pending);
        assert!(entry.batch_id.is_none());

        // only a processing batch can be resolved
        let err = orchestrator.resolve_stuck_batch(&batch_id).await.unwrap_err();
        assert!(matches!(err, PayoutError::WrongBatchState { .. }));
    }
}
