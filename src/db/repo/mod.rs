//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `members.rs` - Member rows, counters, and referral-chain walks
//! - `slots.rs` - Placement-tree occupancy and slot claims
//! - `ledger.rs` - Commission entries and gateway event intake
//! - `payouts.rs` - Payout batches and entry status transitions
//! - `cycles.rs` - Monthly volume archives and resets
//!
//! Concurrency control is deliberately lock-free: every contended write is
//! either a unique-keyed insert (`ON CONFLICT DO NOTHING`, claim succeeded
//! iff a row was inserted) or a conditional update (`WHERE status = ?`,
//! transition succeeded iff a row changed).

mod cycles;
mod ledger;
mod members;
mod payouts;
mod slots;

use crate::domain::Decimal;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }
}

/// Parse a stored canonical decimal, logging and defaulting to zero on
/// malformed data.
fn parse_decimal(raw: &str, context: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|e| {
        warn!(
            value = %raw,
            context = %context,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}
