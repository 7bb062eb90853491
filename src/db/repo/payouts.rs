//! Payout batches and batch/entry assignment.

use crate::domain::{BatchStatus, CommissionEntry, Decimal, PayoutBatch, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::ledger::entry_from_row;
use super::{parse_decimal, Repository};

fn batch_from_row(row: &SqliteRow) -> Option<PayoutBatch> {
    let batch_id: String = row.get("batch_id");
    let status_str: String = row.get("status");
    let total_str: String = row.get("total_amount");

    let Some(status) = BatchStatus::parse(&status_str) else {
        warn!(batch_id = %batch_id, status = %status_str, "Unknown batch status, skipping row");
        return None;
    };

    Some(PayoutBatch {
        total_amount: parse_decimal(&total_str, &format!("payout_batches[{}].total_amount", batch_id)),
        batch_id,
        status,
        entry_count: row.get("entry_count"),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    })
}

impl Repository {
    /// Insert a freshly planned batch.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_batch(&self, batch: &PayoutBatch) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payout_batches (batch_id, status, total_amount, entry_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch.batch_id.as_str())
        .bind(batch.status.as_str())
        .bind(batch.total_amount.to_canonical_string())
        .bind(batch.entry_count)
        .bind(batch.created_at.as_ms())
        .bind(batch.updated_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rewrite a batch's totals from what actually got assigned to it.
    pub async fn update_batch_totals(
        &self,
        batch_id: &str,
        total_amount: Decimal,
        entry_count: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payout_batches SET total_amount = ?, entry_count = ?, updated_at = ? \
             WHERE batch_id = ?",
        )
        .bind(total_amount.to_canonical_string())
        .bind(entry_count)
        .bind(TimeMs::now().as_ms())
        .bind(batch_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a batch by id.
    pub async fn get_batch(&self, batch_id: &str) -> Result<Option<PayoutBatch>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT batch_id, status, total_amount, entry_count, created_at, updated_at \
             FROM payout_batches WHERE batch_id = ?",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(batch_from_row))
    }

    /// Compare-and-set a batch status. Returns true iff the batch was in
    /// `from` and is now in `to`; exactly one of several concurrent callers
    /// wins any given transition.
    pub async fn transition_batch(
        &self,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE payout_batches SET status = ?, updated_at = ? WHERE batch_id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(TimeMs::now().as_ms())
        .bind(batch_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Attach pending, unbatched entries to a batch. Returns how many rows
    /// were tagged; entries grabbed by a concurrent plan are left alone.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn assign_entries_to_batch(
        &self,
        entry_ids: &[String],
        batch_id: &str,
    ) -> Result<u64, sqlx::Error> {
        if entry_ids.is_empty() {
            return Ok(0);
        }

        let now = TimeMs::now().as_ms();
        let mut tagged = 0u64;
        let mut tx = self.pool.begin().await?;

        for entry_id in entry_ids {
            let result = sqlx::query(
                r#"
                UPDATE commission_entries
                SET batch_id = ?, updated_at = ?
                WHERE entry_id = ? AND status = 'pending' AND batch_id IS NULL
                "#,
            )
            .bind(batch_id)
            .bind(now)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
            tagged += result.rows_affected();
        }

        tx.commit().await?;
        Ok(tagged)
    }

    /// Entries attached to a batch, grouped by beneficiary then age.
    pub async fn entries_for_batch(
        &self,
        batch_id: &str,
    ) -> Result<Vec<CommissionEntry>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT entry_id, source_event_id, beneficiary_id, kind, amount, status, \
             retry_count, batch_id, external_ref, error_reason, created_at, updated_at \
             FROM commission_entries WHERE batch_id = ? \
             ORDER BY beneficiary_id ASC, created_at ASC, entry_id ASC",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(entry_from_row).collect())
    }

    /// Detach still-pending entries from a batch so the next plan can pick
    /// them up. Paid and failed entries keep their batch tag for audit.
    pub async fn detach_pending_from_batch(&self, batch_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commission_entries
            SET batch_id = NULL, updated_at = ?
            WHERE batch_id = ? AND status = 'pending'
            "#,
        )
        .bind(TimeMs::now().as_ms())
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
