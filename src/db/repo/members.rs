//! Member rows, counters, and referral-chain walks.

use crate::domain::{Decimal, Member, MemberId, Slot, TimeMs, MAX_LEVEL};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;
use tracing::warn;

use super::{parse_decimal, Repository};

fn member_from_row(row: &SqliteRow) -> Member {
    let member_id: String = row.get("member_id");
    let referrer_id: Option<String> = row.get("referrer_id");
    let slot_level: Option<i64> = row.get("slot_level");
    let slot_idx: Option<i64> = row.get("slot_idx");
    let active: i64 = row.get("active");
    let rate_str: String = row.get("commission_rate");
    let volume_str: String = row.get("monthly_volume");

    let slot = match (slot_level, slot_idx) {
        (Some(level), Some(idx)) => Some(Slot::new(level as u8, idx as u32)),
        _ => None,
    };

    Member {
        commission_rate: parse_decimal(&rate_str, &format!("members[{}].commission_rate", member_id)),
        monthly_volume: parse_decimal(&volume_str, &format!("members[{}].monthly_volume", member_id)),
        member_id: MemberId::new(member_id),
        referrer_id: referrer_id.map(MemberId::new),
        slot,
        active: active != 0,
        active_descendants: row.get("active_descendants"),
        total_descendants: row.get("total_descendants"),
        direct_referrals: row.get("direct_referrals"),
        structure_no: row.get("structure_no"),
        payout_destination: row.get("payout_destination"),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

const MEMBER_COLUMNS: &str = "member_id, referrer_id, slot_level, slot_idx, active, \
     active_descendants, total_descendants, direct_referrals, commission_rate, \
     structure_no, monthly_volume, payout_destination, created_at";

impl Repository {
    /// Insert a member idempotently. Returns true if the row is new.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_member(&self, member: &Member) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO members (
                member_id, referrer_id, slot_level, slot_idx, active,
                active_descendants, total_descendants, direct_referrals,
                commission_rate, structure_no, monthly_volume,
                payout_destination, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(member_id) DO NOTHING
            "#,
        )
        .bind(member.member_id.as_str())
        .bind(member.referrer_id.as_ref().map(|r| r.as_str().to_string()))
        .bind(member.slot.map(|s| s.level as i64))
        .bind(member.slot.map(|s| s.idx as i64))
        .bind(member.active as i64)
        .bind(member.active_descendants)
        .bind(member.total_descendants)
        .bind(member.direct_referrals)
        .bind(member.commission_rate.to_canonical_string())
        .bind(member.structure_no)
        .bind(member.monthly_volume.to_canonical_string())
        .bind(member.payout_destination.as_deref())
        .bind(member.created_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a member by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_member(&self, member_id: &MemberId) -> Result<Option<Member>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM members WHERE member_id = ?",
            MEMBER_COLUMNS
        ))
        .bind(member_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(member_from_row))
    }

    /// Record one more direct referral for a member.
    ///
    /// A no-op when the referrer id does not resolve to a row; signups may
    /// name referrers that were never registered.
    pub async fn increment_direct_referrals(
        &self,
        member_id: &MemberId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE members SET direct_referrals = direct_referrals + 1 WHERE member_id = ?")
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the slot a member was placed into.
    pub async fn set_member_slot(
        &self,
        member_id: &MemberId,
        slot: Slot,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE members SET slot_level = ?, slot_idx = ? WHERE member_id = ?")
            .bind(slot.level as i64)
            .bind(slot.idx as i64)
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flip a member to active. Returns true only for the inactive -> active
    /// transition, so exactly one concurrent caller observes the flip.
    pub async fn mark_active(&self, member_id: &MemberId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE members SET active = 1 WHERE member_id = ? AND active = 0")
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip a member to inactive. Returns true only for the active ->
    /// inactive transition.
    pub async fn mark_inactive(&self, member_id: &MemberId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE members SET active = 0 WHERE member_id = ? AND active = 1")
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Adjust the active-descendant counter of whoever occupies `slot`.
    ///
    /// Each call is a single atomic statement; concurrent adjustments
    /// interleave freely without losing increments. Unoccupied slots
    /// (including the company root) match no row and are skipped.
    pub async fn adjust_active_descendants(
        &self,
        slot: Slot,
        delta: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE members
            SET active_descendants = active_descendants + ?
            WHERE member_id = (SELECT member_id FROM slots WHERE level = ? AND idx = ?)
            "#,
        )
        .bind(delta)
        .bind(slot.level as i64)
        .bind(slot.idx as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one more placement in the subtree of whoever occupies `slot`.
    pub async fn increment_total_descendants(&self, slot: Slot) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE members
            SET total_descendants = total_descendants + 1
            WHERE member_id = (SELECT member_id FROM slots WHERE level = ? AND idx = ?)
            "#,
        )
        .bind(slot.level as i64)
        .bind(slot.idx as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recount a slot's active descendants straight from the tree.
    ///
    /// The incremental counter is the operational value; this derivation
    /// from slot occupancy is the repair path when a crash mid-propagation
    /// left an ancestor behind, and the check tests compare against.
    pub async fn recount_active_descendants(&self, slot: Slot) -> Result<i64, sqlx::Error> {
        let mut total = 0i64;
        for depth in 1..=MAX_LEVEL {
            let Some((level, lo, hi)) = slot.descendant_range(depth) else {
                break;
            };
            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS n
                FROM slots JOIN members ON members.member_id = slots.member_id
                WHERE slots.level = ? AND slots.idx BETWEEN ? AND ? AND members.active = 1
                "#,
            )
            .bind(level as i64)
            .bind(lo as i64)
            .bind(hi as i64)
            .fetch_one(&self.pool)
            .await?;
            total += row.get::<i64, _>("n");
        }
        Ok(total)
    }

    /// Store the recomputed commission rate and structure number.
    pub async fn set_rate_and_structure(
        &self,
        member_id: &MemberId,
        rate: Decimal,
        structure_no: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE members SET commission_rate = ?, structure_no = ? WHERE member_id = ?")
            .bind(rate.to_canonical_string())
            .bind(structure_no)
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Walk the referral graph from a member to the top, nearest first.
    ///
    /// The walk is unbounded in depth. Dangling referrer ids end the walk;
    /// a repeated id means the stored graph has a loop, which is logged and
    /// truncated rather than spun on.
    pub async fn referral_chain(&self, member_id: &MemberId) -> Result<Vec<Member>, sqlx::Error> {
        let mut chain = Vec::new();
        let mut seen: HashSet<MemberId> = HashSet::new();
        seen.insert(member_id.clone());

        let mut cursor = match self.get_member(member_id).await? {
            Some(member) => member.referrer_id,
            None => return Ok(chain),
        };

        while let Some(next_id) = cursor {
            if !seen.insert(next_id.clone()) {
                warn!(member = %member_id, repeated = %next_id, "Referral chain loops, truncating walk");
                break;
            }
            match self.get_member(&next_id).await? {
                Some(member) => {
                    cursor = member.referrer_id.clone();
                    chain.push(member);
                }
                None => break,
            }
        }

        Ok(chain)
    }

    /// Members the monthly cycle must visit: anyone carrying unarchived
    /// volume or currently active. Ordered by id for deterministic runs.
    pub async fn cycle_candidates(&self) -> Result<Vec<Member>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM members WHERE monthly_volume <> '0' OR active = 1 ORDER BY member_id ASC",
            MEMBER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(member_from_row).collect())
    }
}
