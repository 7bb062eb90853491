//! Payment rail abstraction for outbound commission transfers.

use crate::domain::Decimal;
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpPaymentRail;
pub use mock::MockPaymentRail;

/// Receipt returned by the rail for a settled transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Rail-side transaction reference, stored on the paid ledger entry.
    pub external_ref: String,
}

/// Payment rail trait for moving commission money to members.
///
/// Implementations must make retried calls safe: every transfer carries a
/// caller-chosen `reference` the rail can use to deduplicate, so a timeout
/// followed by a retry cannot pay twice.
#[async_trait]
pub trait PaymentRail: Send + Sync + fmt::Debug {
    /// Transfer `amount` to `destination`.
    ///
    /// # Arguments
    /// * `destination` - Member's payout destination on the rail
    /// * `amount` - Transfer amount
    /// * `reference` - Stable dedup reference for this logical transfer
    async fn transfer(
        &self,
        destination: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<TransferReceipt, RailError>;
}

/// Error type for rail operations.
#[derive(Debug, Clone)]
pub enum RailError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded
    RateLimited,
    /// The rail refused the transfer (bad destination, closed account, ...)
    Rejected(String),
}

impl fmt::Display for RailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RailError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            RailError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            RailError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            RailError::RateLimited => write!(f, "Rate limited"),
            RailError::Rejected(msg) => write!(f, "Transfer rejected: {}", msg),
        }
    }
}

impl std::error::Error for RailError {}
