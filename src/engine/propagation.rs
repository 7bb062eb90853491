//! Active-count propagation along the slot tree.
//!
//! Each ancestor's counter moves by an independent atomic increment, so
//! the walk never holds a lock across the whole chain. A crash mid-walk
//! leaves the remaining ancestors one step behind; the admin rate
//! recompute reconciles the derived fields from whatever the counters say.

use crate::db::Repository;
use crate::domain::MemberId;
use crate::engine::CommissionSchedule;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies activation flips to ancestor counters and refreshes the
/// member's own tier.
#[derive(Clone)]
pub struct ActiveCountPropagator {
    repo: Arc<Repository>,
    schedule: CommissionSchedule,
}

impl ActiveCountPropagator {
    pub fn new(repo: Arc<Repository>, schedule: CommissionSchedule) -> Self {
        Self { repo, schedule }
    }

    /// Push an activation change (+1) or deactivation (-1) to every slot
    /// ancestor of the member, then refresh the member's own cached rate.
    ///
    /// Callers must only invoke this after winning the conditional
    /// active-flag flip, so each real state change propagates exactly once.
    /// Returns the number of ancestor counters touched.
    pub async fn apply_change(
        &self,
        member_id: &MemberId,
        delta: i64,
    ) -> Result<usize, sqlx::Error> {
        let Some(slot) = self.repo.slot_for_member(member_id).await? else {
            warn!(member = %member_id, delta, "Activation change for unplaced member, nothing to propagate");
            return Ok(0);
        };

        let ancestors = slot.ancestors();
        for ancestor in &ancestors {
            self.repo.adjust_active_descendants(*ancestor, delta).await?;
        }
        debug!(
            member = %member_id,
            delta,
            ancestors = ancestors.len(),
            "Propagated activation change"
        );

        self.refresh_rate(member_id).await?;
        Ok(ancestors.len())
    }

    /// Recompute and store the member's commission rate and structure
    /// number from their current active-descendant count.
    pub async fn refresh_rate(&self, member_id: &MemberId) -> Result<(), sqlx::Error> {
        let Some(member) = self.repo.get_member(member_id).await? else {
            return Ok(());
        };
        let rate = self.schedule.rate_for(member.active_descendants);
        let structure_no = self.schedule.structure_number_for(member.active_descendants);
        self.repo
            .set_rate_and_structure(member_id, rate, structure_no)
            .await
    }
}
