//! Monthly cycle: archive volumes, credit the tiered residual, reset.
//!
//! The cycle runs per member in three sub-steps. The archive insert is the
//! idempotency guard: once a member's row exists for the period, a re-run
//! skips them, so a halted run can be re-triggered without double credit.

use crate::db::Repository;
use crate::domain::{CommissionDraft, Decimal, Member, Period};
use crate::engine::CommissionEngine;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Clone)]
pub struct MonthlyCycleProcessor {
    repo: Arc<Repository>,
    engine: CommissionEngine,
    qualification_min_directs: i64,
}

impl MonthlyCycleProcessor {
    pub fn new(
        repo: Arc<Repository>,
        engine: CommissionEngine,
        qualification_min_directs: i64,
    ) -> Self {
        Self {
            repo,
            engine,
            qualification_min_directs,
        }
    }

    /// Close a period for every member carrying volume or currently
    /// active. Active members with nothing to credit still get an archive
    /// row, which marks the period processed for them. Any error halts
    /// the run where it stands; the operator re-triggers and already
    /// archived members are skipped.
    ///
    /// With `dry_run` the same plan is computed and reported without
    /// writing anything.
    pub async fn run(&self, period: &Period, dry_run: bool) -> Result<CycleReport, CycleError> {
        let members = self.repo.cycle_candidates().await?;
        info!(
            period = %period,
            candidates = members.len(),
            dry_run,
            "Starting monthly cycle"
        );

        let mut report = CycleReport {
            archived: 0,
            skipped: 0,
            credited: 0,
            total_credited: Decimal::zero(),
        };

        for member in members {
            let volume = member.monthly_volume;

            if dry_run {
                if self
                    .repo
                    .get_volume_archive(&member.member_id, period)
                    .await?
                    .is_some()
                {
                    report.skipped += 1;
                    continue;
                }
                report.archived += 1;
                if let Some(draft) = self.draft_for(&member, volume, period) {
                    report.credited += 1;
                    report.total_credited = report.total_credited + draft.amount;
                }
                continue;
            }

            // step 1: archive, the per-member guard for this period
            if !self
                .repo
                .insert_volume_archive(&member.member_id, period, volume)
                .await?
            {
                debug!(member = %member.member_id, period = %period, "Already archived, skipping");
                report.skipped += 1;
                continue;
            }
            report.archived += 1;

            // step 2: credit the residual at the member's tier
            if let Some(draft) = self.draft_for(&member, volume, period) {
                let inserted = self.repo.record_commissions(&[draft]).await?;
                if let Some(entry) = inserted.first() {
                    report.credited += 1;
                    report.total_credited = report.total_credited + entry.amount;
                    debug!(
                        member = %member.member_id,
                        amount = %entry.amount,
                        "Credited monthly residual"
                    );
                }
            }

            // step 3: release the archived amount from the live counter
            self.repo
                .reduce_monthly_volume(&member.member_id, volume)
                .await?;
        }

        info!(
            period = %period,
            archived = report.archived,
            skipped = report.skipped,
            credited = report.credited,
            total = %report.total_credited,
            dry_run,
            "Finished monthly cycle"
        );
        Ok(report)
    }

    fn draft_for(
        &self,
        member: &Member,
        volume: Decimal,
        period: &Period,
    ) -> Option<CommissionDraft> {
        if !member.is_qualified(self.qualification_min_directs) {
            return None;
        }
        self.engine.monthly_residual(member, volume, period)
    }
}

#[derive(Debug)]
pub struct CycleReport {
    /// Members whose volume was archived by this run.
    pub archived: usize,
    /// Members already archived for the period by an earlier run.
    pub skipped: usize,
    /// Monthly residual entries created.
    pub credited: usize,
    pub total_credited: Decimal,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
