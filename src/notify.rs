//! Member notifications for credited commissions and payout outcomes.
//!
//! Delivery is best-effort: orchestrators fire notifications off the hot
//! path and log failures rather than blocking or failing money movement.

use crate::domain::{CommissionKind, Decimal, MemberId};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// A member-facing event worth telling them about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    #[serde(rename_all = "camelCase")]
    CommissionEarned {
        member_id: MemberId,
        amount: Decimal,
        kind: CommissionKind,
        source_event_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PayoutCompleted {
        member_id: MemberId,
        amount: Decimal,
        external_ref: String,
    },
    #[serde(rename_all = "camelCase")]
    PayoutFailed {
        member_id: MemberId,
        amount: Decimal,
        reason: String,
    },
}

/// Error delivering a notice.
#[derive(Debug, Clone, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Notification sink.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Delivers notices to a webhook URL with a short retry window.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(notice)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(NotifyError(e.to_string())))?;

            let status = response.status();
            if status.is_server_error() || status == 429 {
                return Err(backoff::Error::transient(NotifyError(format!(
                    "webhook returned {}",
                    status
                ))));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(NotifyError(format!(
                    "webhook returned {}",
                    status
                ))));
            }
            Ok(())
        })
        .await
    }
}

/// Fallback sink when no webhook is configured: notices only hit the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        info!(notice = ?notice, "Member notification (no webhook configured)");
        Ok(())
    }
}

/// Records notices for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<Notice>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices sent so far, in order.
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
