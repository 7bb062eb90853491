//! Commission entries and gateway event intake.

use crate::domain::{
    CommissionDraft, CommissionEntry, CommissionKind, CommissionStatus, Decimal, MemberId,
    PaymentEvent, SubscriptionEvent, TimeMs,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::{parse_decimal, Repository};

const ENTRY_COLUMNS: &str = "entry_id, source_event_id, beneficiary_id, kind, amount, status, \
     retry_count, batch_id, external_ref, error_reason, created_at, updated_at";

pub(super) fn entry_from_row(row: &SqliteRow) -> Option<CommissionEntry> {
    let entry_id: String = row.get("entry_id");
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");
    let amount_str: String = row.get("amount");

    let Some(kind) = CommissionKind::parse(&kind_str) else {
        warn!(entry_id = %entry_id, kind = %kind_str, "Unknown commission kind in ledger row, skipping");
        return None;
    };
    let Some(status) = CommissionStatus::parse(&status_str) else {
        warn!(entry_id = %entry_id, status = %status_str, "Unknown commission status in ledger row, skipping");
        return None;
    };

    Some(CommissionEntry {
        amount: parse_decimal(&amount_str, &format!("commission_entries[{}].amount", entry_id)),
        entry_id,
        source_event_id: row.get("source_event_id"),
        beneficiary_id: MemberId::new(row.get("beneficiary_id")),
        kind,
        status,
        retry_count: row.get("retry_count"),
        batch_id: row.get("batch_id"),
        external_ref: row.get("external_ref"),
        error_reason: row.get("error_reason"),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    })
}

impl Repository {
    /// Persist commission drafts as pending ledger entries in one
    /// transaction. Returns only the entries this call created; drafts that
    /// collide with an existing (source_event_id, beneficiary_id, kind) row
    /// are dropped silently, which is what makes redelivery a no-op.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn record_commissions(
        &self,
        drafts: &[CommissionDraft],
    ) -> Result<Vec<CommissionEntry>, sqlx::Error> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let now = TimeMs::now();
        let mut inserted = Vec::new();
        let mut tx = self.pool.begin().await?;

        for draft in drafts {
            let entry = CommissionEntry::from_draft(draft.clone(), now);
            let result = sqlx::query(
                r#"
                INSERT INTO commission_entries (
                    entry_id, source_event_id, beneficiary_id, kind, amount,
                    status, retry_count, batch_id, external_ref, error_reason,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_event_id, beneficiary_id, kind) DO NOTHING
                "#,
            )
            .bind(entry.entry_id.as_str())
            .bind(entry.source_event_id.as_str())
            .bind(entry.beneficiary_id.as_str())
            .bind(entry.kind.as_str())
            .bind(entry.amount.to_canonical_string())
            .bind(entry.status.as_str())
            .bind(entry.retry_count)
            .bind(entry.batch_id.as_deref())
            .bind(entry.external_ref.as_deref())
            .bind(entry.error_reason.as_deref())
            .bind(entry.created_at.as_ms())
            .bind(entry.updated_at.as_ms())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted.push(entry);
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Fetch a single ledger entry.
    pub async fn get_entry(&self, entry_id: &str) -> Result<Option<CommissionEntry>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM commission_entries WHERE entry_id = ?",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(entry_from_row))
    }

    /// Ledger entries for a beneficiary, optionally filtered by status,
    /// oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn entries_for_beneficiary(
        &self,
        member_id: &MemberId,
        status: Option<CommissionStatus>,
    ) -> Result<Vec<CommissionEntry>, sqlx::Error> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM commission_entries \
                     WHERE beneficiary_id = ? AND status = ? \
                     ORDER BY created_at ASC, entry_id ASC",
                    ENTRY_COLUMNS
                ))
                .bind(member_id.as_str())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM commission_entries \
                     WHERE beneficiary_id = ? \
                     ORDER BY created_at ASC, entry_id ASC",
                    ENTRY_COLUMNS
                ))
                .bind(member_id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().filter_map(entry_from_row).collect())
    }

    /// Pending entries not yet assigned to any batch, oldest first.
    pub async fn pending_unbatched(&self) -> Result<Vec<CommissionEntry>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM commission_entries \
             WHERE status = 'pending' AND batch_id IS NULL \
             ORDER BY created_at ASC, entry_id ASC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(entry_from_row).collect())
    }

    /// Move a pending entry to paid, recording the rail receipt.
    /// Conditional on the current status, so a replayed transition is a
    /// no-op returning false.
    pub async fn mark_entry_paid(
        &self,
        entry_id: &str,
        external_ref: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commission_entries
            SET status = 'paid', external_ref = ?, error_reason = NULL, updated_at = ?
            WHERE entry_id = ? AND status = 'pending'
            "#,
        )
        .bind(external_ref)
        .bind(TimeMs::now().as_ms())
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a pending entry to failed, counting the attempt.
    pub async fn mark_entry_failed(
        &self,
        entry_id: &str,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commission_entries
            SET status = 'failed', retry_count = retry_count + 1, error_reason = ?, updated_at = ?
            WHERE entry_id = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(TimeMs::now().as_ms())
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a pending entry administratively, before any batch pays it.
    pub async fn mark_entry_cancelled(
        &self,
        entry_id: &str,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commission_entries
            SET status = 'cancelled', batch_id = NULL, error_reason = ?, updated_at = ?
            WHERE entry_id = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(TimeMs::now().as_ms())
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Requeue failed entries that still have retries left. Returns how
    /// many moved back to pending.
    pub async fn requeue_failed(&self, max_retries: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commission_entries
            SET status = 'pending', batch_id = NULL, updated_at = ?
            WHERE status = 'failed' AND retry_count < ?
            "#,
        )
        .bind(TimeMs::now().as_ms())
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancel failed entries that have exhausted their retries. Returns how
    /// many were cancelled; each needs manual review.
    pub async fn cancel_exhausted(&self, max_retries: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commission_entries
            SET status = 'cancelled', batch_id = NULL, updated_at = ?
            WHERE status = 'failed' AND retry_count >= ?
            "#,
        )
        .bind(TimeMs::now().as_ms())
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Record a payment event and apply its volume accruals atomically.
    ///
    /// Returns false without touching any volume when the event key was
    /// already recorded. The read-modify-write on each ancestor's volume is
    /// safe inside the transaction: SQLite allows a single writer at a
    /// time, so no other write can interleave with it.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn record_payment_event(
        &self,
        event: &PaymentEvent,
        accruals: &[(MemberId, Decimal)],
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO gateway_events (event_key, member_id, kind, amount, time_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_key) DO NOTHING
            "#,
        )
        .bind(event.event_key.as_str())
        .bind(event.member_id.as_str())
        .bind(format!("payment:{}", event.kind))
        .bind(event.amount.to_canonical_string())
        .bind(event.time_ms.as_ms())
        .bind(TimeMs::now().as_ms())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (member_id, delta) in accruals {
            let row = sqlx::query("SELECT monthly_volume FROM members WHERE member_id = ?")
                .bind(member_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else { continue };

            let current: String = row.get("monthly_volume");
            let next = parse_decimal(&current, &format!("members[{}].monthly_volume", member_id))
                + *delta;
            sqlx::query("UPDATE members SET monthly_volume = ? WHERE member_id = ?")
                .bind(next.to_canonical_string())
                .bind(member_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Record a subscription status event. Returns true if the key is new.
    pub async fn record_subscription_event(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO gateway_events (event_key, member_id, kind, amount, time_ms, created_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            ON CONFLICT(event_key) DO NOTHING
            "#,
        )
        .bind(event.event_key.as_str())
        .bind(event.member_id.as_str())
        .bind(if event.active {
            "subscription:active"
        } else {
            "subscription:inactive"
        })
        .bind(event.time_ms.as_ms())
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use crate::domain::{
        CommissionDraft, CommissionKind, CommissionStatus, Decimal, Member, MemberId,
        PaymentEvent, PaymentKind, TimeMs,
    };
    use std::str::FromStr;

    fn draft(event: &str, beneficiary: &str, kind: CommissionKind, amount: &str) -> CommissionDraft {
        CommissionDraft {
            source_event_id: event.to_string(),
            beneficiary_id: MemberId::new(beneficiary.to_string()),
            kind,
            amount: Decimal::from_str(amount).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_record_commissions_dedupes_on_replay() {
        let (repo, _temp) = setup_test_db().await;

        let drafts = vec![
            draft("evt_1", "a", CommissionKind::Residual, "0.5"),
            draft("evt_1", "b", CommissionKind::Residual, "0.5"),
        ];

        let first = repo.record_commissions(&drafts).await.unwrap();
        assert_eq!(first.len(), 2);

        let replay = repo.record_commissions(&drafts).await.unwrap();
        assert!(replay.is_empty());

        let entries = repo
            .entries_for_beneficiary(&MemberId::new("a".into()), None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_same_event_distinct_kinds_coexist() {
        let (repo, _temp) = setup_test_db().await;

        let drafts = vec![
            draft("evt_1", "a", CommissionKind::DirectBonus, "25"),
            draft("evt_1", "a", CommissionKind::Residual, "0.5"),
        ];
        let inserted = repo.record_commissions(&drafts).await.unwrap();
        assert_eq!(inserted.len(), 2);
    }

    #[tokio::test]
    async fn test_paid_transition_fires_once() {
        let (repo, _temp) = setup_test_db().await;
        let inserted = repo
            .record_commissions(&[draft("evt_1", "a", CommissionKind::DirectBonus, "25")])
            .await
            .unwrap();
        let id = inserted[0].entry_id.clone();

        assert!(repo.mark_entry_paid(&id, "rail_tx_1").await.unwrap());
        assert!(!repo.mark_entry_paid(&id, "rail_tx_2").await.unwrap());

        let entry = repo.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Paid);
        assert_eq!(entry.external_ref.as_deref(), Some("rail_tx_1"));
    }

    #[tokio::test]
    async fn test_cancel_only_hits_pending_entries() {
        let (repo, _temp) = setup_test_db().await;
        let inserted = repo
            .record_commissions(&[
                draft("evt_1", "a", CommissionKind::DirectBonus, "25"),
                draft("evt_1", "b", CommissionKind::DirectBonus, "25"),
            ])
            .await
            .unwrap();

        assert!(repo
            .mark_entry_cancelled(&inserted[0].entry_id, "clawback")
            .await
            .unwrap());
        let entry = repo.get_entry(&inserted[0].entry_id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Cancelled);
        assert_eq!(entry.error_reason.as_deref(), Some("clawback"));

        // a paid entry is out of reach
        repo.mark_entry_paid(&inserted[1].entry_id, "rail_tx_1").await.unwrap();
        assert!(!repo
            .mark_entry_cancelled(&inserted[1].entry_id, "clawback")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_requeue_and_exhaustion() {
        let (repo, _temp) = setup_test_db().await;
        let inserted = repo
            .record_commissions(&[draft("evt_1", "a", CommissionKind::Residual, "1")])
            .await
            .unwrap();
        let id = inserted[0].entry_id.clone();

        assert!(repo.mark_entry_failed(&id, "rail unreachable").await.unwrap());
        let entry = repo.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Failed);
        assert_eq!(entry.retry_count, 1);

        // one retry left out of 3
        assert_eq!(repo.requeue_failed(3).await.unwrap(), 1);
        let entry = repo.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Pending);

        // exhaust the retries
        assert!(repo.mark_entry_failed(&id, "rail unreachable").await.unwrap());
        repo.requeue_failed(3).await.unwrap();
        assert!(repo.mark_entry_failed(&id, "rail unreachable").await.unwrap());
        assert_eq!(repo.requeue_failed(3).await.unwrap(), 0);
        assert_eq!(repo.cancel_exhausted(3).await.unwrap(), 1);

        let entry = repo.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, CommissionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_payment_event_accrues_volume_once() {
        let (repo, _temp) = setup_test_db().await;
        repo.insert_member(&Member::new(MemberId::new("up".into()), None))
            .await
            .unwrap();

        let event = PaymentEvent::new(
            MemberId::new("payer".into()),
            Decimal::from_str("49.99").unwrap(),
            PaymentKind::Recurring,
            TimeMs::new(1000),
            Some("evt_1".into()),
        );
        let accruals = vec![(MemberId::new("up".into()), Decimal::from_str("49.99").unwrap())];

        assert!(repo.record_payment_event(&event, &accruals).await.unwrap());
        assert!(!repo.record_payment_event(&event, &accruals).await.unwrap());

        let member = repo
            .get_member(&MemberId::new("up".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.monthly_volume, Decimal::from_str("49.99").unwrap());
    }

    #[tokio::test]
    async fn test_payment_event_skips_unknown_ancestor() {
        let (repo, _temp) = setup_test_db().await;

        let event = PaymentEvent::new(
            MemberId::new("payer".into()),
            Decimal::from_str("10").unwrap(),
            PaymentKind::Recurring,
            TimeMs::new(1000),
            Some("evt_2".into()),
        );
        let accruals = vec![(MemberId::new("ghost".into()), Decimal::from_str("10").unwrap())];
        assert!(repo.record_payment_event(&event, &accruals).await.unwrap());
    }
}
