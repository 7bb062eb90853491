//! Placement-tree occupancy and slot claims.

use crate::domain::{MemberId, Slot};
use sqlx::Row;

use super::Repository;

impl Repository {
    /// Claim a slot for a member by unique insert.
    ///
    /// Returns true iff this call inserted the row. A false return means
    /// either the slot was taken by a concurrent claim or the member is
    /// already placed somewhere; callers restart their search and re-check.
    pub async fn claim_slot(&self, slot: Slot, member_id: &MemberId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO slots (level, idx, member_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(slot.level as i64)
        .bind(slot.idx as i64)
        .bind(member_id.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Where a member sits in the tree, if placed.
    pub async fn slot_for_member(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<Slot>, sqlx::Error> {
        let row = sqlx::query("SELECT level, idx FROM slots WHERE member_id = ?")
            .bind(member_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let level: i64 = r.get("level");
            let idx: i64 = r.get("idx");
            Slot::new(level as u8, idx as u32)
        }))
    }

    /// Who occupies a slot, if anyone.
    pub async fn slot_occupant(&self, slot: Slot) -> Result<Option<MemberId>, sqlx::Error> {
        let row = sqlx::query("SELECT member_id FROM slots WHERE level = ? AND idx = ?")
            .bind(slot.level as i64)
            .bind(slot.idx as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| MemberId::new(r.get("member_id"))))
    }

    /// Occupied indices within one level's contiguous index range,
    /// ascending. Descendants of a slot at a fixed depth always form such
    /// a range, so this is the only occupancy query the search needs.
    pub async fn occupied_indices(
        &self,
        level: u8,
        lo: u32,
        hi: u32,
    ) -> Result<Vec<u32>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT idx FROM slots WHERE level = ? AND idx >= ? AND idx <= ? ORDER BY idx ASC",
        )
        .bind(level as i64)
        .bind(lo as i64)
        .bind(hi as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| r.get::<i64, _>("idx") as u32)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use crate::domain::{MemberId, Slot};

    #[tokio::test]
    async fn test_claim_is_first_writer_wins() {
        let (repo, _temp) = setup_test_db().await;
        let slot = Slot::new(1, 1);

        let first = repo
            .claim_slot(slot, &MemberId::new("m1".into()))
            .await
            .unwrap();
        let second = repo
            .claim_slot(slot, &MemberId::new("m2".into()))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(
            repo.slot_occupant(slot).await.unwrap(),
            Some(MemberId::new("m1".into()))
        );
    }

    #[tokio::test]
    async fn test_member_cannot_hold_two_slots() {
        let (repo, _temp) = setup_test_db().await;
        let id = MemberId::new("m1".to_string());

        assert!(repo.claim_slot(Slot::new(1, 1), &id).await.unwrap());
        assert!(!repo.claim_slot(Slot::new(1, 2), &id).await.unwrap());
        assert_eq!(repo.slot_for_member(&id).await.unwrap(), Some(Slot::new(1, 1)));
    }

    #[tokio::test]
    async fn test_occupied_indices_ordered_within_range() {
        let (repo, _temp) = setup_test_db().await;
        for (idx, member) in [(6, "a"), (4, "b"), (9, "c"), (2, "d")] {
            repo.claim_slot(Slot::new(2, idx), &MemberId::new(member.into()))
                .await
                .unwrap();
        }

        let occupied = repo.occupied_indices(2, 4, 9).await.unwrap();
        assert_eq!(occupied, vec![4, 6, 9]);

        let empty = repo.occupied_indices(3, 1, 27).await.unwrap();
        assert!(empty.is_empty());
    }
}
