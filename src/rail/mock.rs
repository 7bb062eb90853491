//! Mock payment rail for testing without network calls.

use super::{PaymentRail, RailError, TransferReceipt};
use crate::domain::Decimal;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A transfer the mock rail was asked to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub destination: String,
    pub amount: Decimal,
    pub reference: String,
}

#[derive(Debug, Default)]
struct MockState {
    transfers: Vec<RecordedTransfer>,
    failures: HashMap<String, usize>,
    sequence: usize,
}

/// Mock rail that records transfers and fails on demand.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentRail {
    state: Arc<Mutex<MockState>>,
}

impl MockPaymentRail {
    /// Create a mock rail that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transfer to `destination` fail.
    pub fn failing(self, destination: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(destination.to_string(), usize::MAX);
        self
    }

    /// Make the next `times` transfers to `destination` fail, then succeed.
    pub fn failing_times(self, destination: &str, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(destination.to_string(), times);
        self
    }

    /// Transfers requested so far, in order.
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state.lock().unwrap().transfers.clone()
    }
}

#[async_trait]
impl PaymentRail for MockPaymentRail {
    async fn transfer(
        &self,
        destination: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<TransferReceipt, RailError> {
        let mut state = self.state.lock().unwrap();
        state.transfers.push(RecordedTransfer {
            destination: destination.to_string(),
            amount,
            reference: reference.to_string(),
        });

        if let Some(remaining) = state.failures.get_mut(destination) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(RailError::Rejected(format!(
                    "mock failure for {}",
                    destination
                )));
            }
        }

        state.sequence += 1;
        Ok(TransferReceipt {
            external_ref: format!("mock:{}", state.sequence),
        })
    }
}
