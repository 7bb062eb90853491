//! Domain types for the Trading Hub allocation and commission engine.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, MemberId, Period
//! - Slot coordinates and ternary-tree math
//! - Payment/subscription events with stable idempotency keys
//! - Commission ledger entries and payout batch types

pub mod commission;
pub mod decimal;
pub mod member;
pub mod payment;
pub mod payout;
pub mod primitives;
pub mod slot;

pub use commission::{CommissionDraft, CommissionEntry, CommissionKind, CommissionStatus};
pub use decimal::Decimal;
pub use member::Member;
pub use payment::{PaymentEvent, PaymentKind, SubscriptionEvent};
pub use payout::{BatchStatus, PayoutBatch};
pub use primitives::{MemberId, Period, PeriodParseError, TimeMs};
pub use slot::{Slot, MAX_LEVEL, SLOT_FANOUT, STRUCTURE_CAPACITY};
