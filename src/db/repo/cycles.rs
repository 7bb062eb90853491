//! Monthly volume archives and live-counter resets.

use crate::domain::{Decimal, MemberId, Period, TimeMs};
use sqlx::Row;
use tracing::warn;

use super::{parse_decimal, Repository};

impl Repository {
    /// Archive a member's volume for a period. Returns true iff this call
    /// created the archive row; a false return means the period was already
    /// processed for this member and the cycle must not credit them again.
    pub async fn insert_volume_archive(
        &self,
        member_id: &MemberId,
        period: &Period,
        volume: Decimal,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO volume_archives (member_id, period, volume, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(member_id, period) DO NOTHING
            "#,
        )
        .bind(member_id.as_str())
        .bind(period.as_str())
        .bind(volume.to_canonical_string())
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch an archived volume, if the period was processed.
    pub async fn get_volume_archive(
        &self,
        member_id: &MemberId,
        period: &Period,
    ) -> Result<Option<Decimal>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT volume FROM volume_archives WHERE member_id = ? AND period = ?",
        )
        .bind(member_id.as_str())
        .bind(period.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let volume_str: String = r.get("volume");
            parse_decimal(
                &volume_str,
                &format!("volume_archives[{}/{}].volume", member_id, period),
            )
        }))
    }

    /// Subtract an archived amount from a member's live volume.
    ///
    /// Subtraction rather than a reset to zero: payments landing between
    /// the archive insert and this call stay in the live counter for the
    /// next period. The read-modify-write is safe inside the transaction
    /// because SQLite allows a single writer at a time.
    pub async fn reduce_monthly_volume(
        &self,
        member_id: &MemberId,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT monthly_volume FROM members WHERE member_id = ?")
            .bind(member_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(());
        };

        let current_str: String = row.get("monthly_volume");
        let current = parse_decimal(
            &current_str,
            &format!("members[{}].monthly_volume", member_id),
        );
        let mut next = current - amount;
        if next.is_negative() {
            warn!(
                member = %member_id,
                current = %current,
                subtracted = %amount,
                "Volume reset would go negative, clamping to zero"
            );
            next = Decimal::zero();
        }

        sqlx::query("UPDATE members SET monthly_volume = ? WHERE member_id = ?")
            .bind(next.to_canonical_string())
            .bind(member_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
