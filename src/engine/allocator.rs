//! Slot search and placement.
//!
//! Placement claims slots by unique insert, so two concurrent signups can
//! never share a slot. A lost claim means the slot just became occupied;
//! the search restarts from the anchor and will skip it, so the retry loop
//! can only run as long as other writers keep filling slots.

use crate::db::Repository;
use crate::domain::{MemberId, Slot, MAX_LEVEL};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placement failures surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// No open slot within six levels of any anchor, all the way up to the
    /// global root.
    #[error("placement tree exhausted: no open slot reachable from any anchor")]
    TreeExhausted,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Where a member ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOutcome {
    /// The member's slot.
    pub slot: Slot,
    /// False when the member was already placed and the call changed
    /// nothing.
    pub newly_placed: bool,
}

enum PlaceAttempt {
    Placed(Slot),
    RaceLost(Slot),
    Exhausted,
}

/// Finds and claims tree positions for new members.
#[derive(Clone)]
pub struct PositionAllocator {
    repo: Arc<Repository>,
}

impl PositionAllocator {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Place a member in the tree, or return their existing slot.
    ///
    /// The search anchors at the referrer's slot (the global root when the
    /// referrer is absent or unplaced) and scans that anchor's subtree
    /// level by level, left to right, up to six levels down. A full
    /// subtree escalates the anchor one level toward the root.
    ///
    /// # Errors
    /// [`AllocationError::TreeExhausted`] when no anchor up to the root has
    /// an open slot.
    pub async fn allocate(
        &self,
        member_id: &MemberId,
        referrer_id: Option<&MemberId>,
    ) -> Result<AllocationOutcome, AllocationError> {
        let anchor = match referrer_id {
            Some(rid) => match self.repo.slot_for_member(rid).await? {
                Some(slot) => slot,
                None => {
                    debug!(member = %member_id, referrer = %rid, "Referrer unplaced, anchoring at root");
                    Slot::root()
                }
            },
            None => Slot::root(),
        };

        let mut attempts = 0u32;
        loop {
            // a concurrent call may have placed this member already
            if let Some(slot) = self.repo.slot_for_member(member_id).await? {
                self.repo.set_member_slot(member_id, slot).await?;
                return Ok(AllocationOutcome {
                    slot,
                    newly_placed: false,
                });
            }

            match self.place_once(member_id, anchor).await? {
                PlaceAttempt::Placed(slot) => {
                    self.repo.set_member_slot(member_id, slot).await?;
                    for ancestor in slot.ancestors() {
                        self.repo.increment_total_descendants(ancestor).await?;
                    }
                    info!(member = %member_id, slot = %slot, anchor = %anchor, "Member placed");
                    return Ok(AllocationOutcome {
                        slot,
                        newly_placed: true,
                    });
                }
                PlaceAttempt::RaceLost(slot) => {
                    attempts += 1;
                    debug!(
                        member = %member_id,
                        slot = %slot,
                        attempts,
                        "Lost slot claim race, restarting search from anchor"
                    );
                    if attempts % 50 == 0 {
                        warn!(member = %member_id, attempts, "Placement still racing");
                    }
                }
                PlaceAttempt::Exhausted => return Err(AllocationError::TreeExhausted),
            }
        }
    }

    /// One full search pass: first open slot under `start_anchor`, then
    /// under each anchor above it.
    async fn place_once(
        &self,
        member_id: &MemberId,
        start_anchor: Slot,
    ) -> Result<PlaceAttempt, sqlx::Error> {
        let mut anchor = start_anchor;
        loop {
            for depth in 1..=MAX_LEVEL {
                let Some((level, lo, hi)) = anchor.descendant_range(depth) else {
                    break;
                };
                let occupied: HashSet<u32> = self
                    .repo
                    .occupied_indices(level, lo, hi)
                    .await?
                    .into_iter()
                    .collect();
                if occupied.len() as u32 == hi - lo + 1 {
                    continue;
                }

                for idx in lo..=hi {
                    if occupied.contains(&idx) {
                        continue;
                    }
                    let slot = Slot::new(level, idx);
                    return if self.repo.claim_slot(slot, member_id).await? {
                        Ok(PlaceAttempt::Placed(slot))
                    } else {
                        Ok(PlaceAttempt::RaceLost(slot))
                    };
                }
            }

            // subtree full: this structure is complete, escalate the anchor
            match anchor.parent() {
                Some(parent) => {
                    debug!(anchor = %anchor, next = %parent, "Anchor subtree full, escalating");
                    anchor = parent;
                }
                None => return Ok(PlaceAttempt::Exhausted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::Member;
    use tempfile::TempDir;

    async fn setup() -> (PositionAllocator, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        (PositionAllocator::new(repo.clone()), repo, temp_dir)
    }

    fn id(s: &str) -> MemberId {
        MemberId::new(s.to_string())
    }

    async fn signup(repo: &Repository, member: &str, referrer: Option<&str>) {
        repo.insert_member(&Member::new(id(member), referrer.map(id)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_member_lands_under_root() {
        let (allocator, repo, _temp) = setup().await;
        signup(&repo, "m1", None).await;

        let outcome = allocator.allocate(&id("m1"), None).await.unwrap();
        assert!(outcome.newly_placed);
        assert_eq!(outcome.slot, Slot::new(1, 1));
    }

    #[tokio::test]
    async fn test_allocate_is_idempotent() {
        let (allocator, repo, _temp) = setup().await;
        signup(&repo, "m1", None).await;

        let first = allocator.allocate(&id("m1"), None).await.unwrap();
        let again = allocator.allocate(&id("m1"), None).await.unwrap();
        assert!(!again.newly_placed);
        assert_eq!(again.slot, first.slot);
    }

    #[tokio::test]
    async fn test_children_fill_left_to_right() {
        let (allocator, repo, _temp) = setup().await;
        for m in ["a", "b", "c", "d"] {
            signup(&repo, m, None).await;
        }

        assert_eq!(allocator.allocate(&id("a"), None).await.unwrap().slot, Slot::new(1, 1));
        assert_eq!(allocator.allocate(&id("b"), None).await.unwrap().slot, Slot::new(1, 2));
        assert_eq!(allocator.allocate(&id("c"), None).await.unwrap().slot, Slot::new(1, 3));
        // root's children full: next lands one level deeper, leftmost
        assert_eq!(allocator.allocate(&id("d"), None).await.unwrap().slot, Slot::new(2, 1));
    }

    #[tokio::test]
    async fn test_spillover_stays_in_referrer_subtree() {
        let (allocator, repo, _temp) = setup().await;
        signup(&repo, "ref", None).await;
        allocator.allocate(&id("ref"), None).await.unwrap();

        // fill the referrer's three children
        for m in ["c1", "c2", "c3"] {
            signup(&repo, m, Some("ref")).await;
            allocator.allocate(&id(m), Some(&id("ref"))).await.unwrap();
        }

        // fourth referral spills to depth 2 of ref's subtree, not to (1,2)
        signup(&repo, "c4", Some("ref")).await;
        let outcome = allocator.allocate(&id("c4"), Some(&id("ref"))).await.unwrap();
        assert_eq!(outcome.slot, Slot::new(3, 1));
        assert_eq!(outcome.slot.parent(), Some(Slot::new(2, 1)));
        assert!(Slot::new(1, 1).contains(&outcome.slot));
    }

    #[tokio::test]
    async fn test_unplaced_referrer_anchors_at_root() {
        let (allocator, repo, _temp) = setup().await;
        signup(&repo, "m1", Some("ghost")).await;

        let outcome = allocator.allocate(&id("m1"), Some(&id("ghost"))).await.unwrap();
        assert_eq!(outcome.slot, Slot::new(1, 1));
    }

    #[tokio::test]
    async fn test_leaf_anchor_escalates_to_parent_subtree() {
        let (allocator, repo, _temp) = setup().await;

        // hand-place a referrer at the deepest level
        let leaf = Slot::new(6, 1);
        signup(&repo, "leaf", None).await;
        repo.claim_slot(leaf, &id("leaf")).await.unwrap();
        repo.set_member_slot(&id("leaf"), leaf).await.unwrap();

        // no room below a leaf: the search must climb and use an open slot
        signup(&repo, "m1", Some("leaf")).await;
        let outcome = allocator.allocate(&id("m1"), Some(&id("leaf"))).await.unwrap();
        assert!(outcome.newly_placed);
        assert_ne!(outcome.slot, leaf);
        assert_eq!(outcome.slot.level, 6);
        assert_eq!(outcome.slot.idx, 2);
    }

    #[tokio::test]
    async fn test_totals_bumped_for_ancestors() {
        let (allocator, repo, _temp) = setup().await;
        signup(&repo, "a", None).await;
        allocator.allocate(&id("a"), None).await.unwrap();

        signup(&repo, "b", Some("a")).await;
        allocator.allocate(&id("b"), Some(&id("a"))).await.unwrap();
        signup(&repo, "c", Some("a")).await;
        allocator.allocate(&id("c"), Some(&id("a"))).await.unwrap();

        let a = repo.get_member(&id("a")).await.unwrap().unwrap();
        assert_eq!(a.total_descendants, 2);
        let b = repo.get_member(&id("b")).await.unwrap().unwrap();
        assert_eq!(b.total_descendants, 0);
    }
}
