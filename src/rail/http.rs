//! HTTP payment rail client.

use super::{PaymentRail, RailError, TransferReceipt};
use crate::domain::Decimal;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Payment rail over the treasury gateway's transfer API.
///
/// Transient failures (network, 429, 5xx) are retried with exponential
/// backoff. The dedup reference travels in the request body, so a retry
/// after an ambiguous timeout settles the same logical transfer at most
/// once on the rail side.
#[derive(Debug, Clone)]
pub struct HttpPaymentRail {
    client: Client,
    base_url: String,
}

impl HttpPaymentRail {
    /// Create a new rail client against the given gateway base URL.
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl PaymentRail for HttpPaymentRail {
    async fn transfer(
        &self,
        destination: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<TransferReceipt, RailError> {
        debug!(
            "Requesting transfer of {} to {} (reference {})",
            amount, destination, reference
        );

        let url = format!("{}/v1/transfers", self.base_url);
        let payload = serde_json::json!({
            "destination": destination,
            "amount": amount.to_canonical_string(),
            "reference": reference,
        });

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let response = retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(RailError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(RailError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(RailError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Client error".to_string());
                return Err(backoff::Error::permanent(RailError::Rejected(format!(
                    "{}: {}",
                    status.as_u16(),
                    message
                ))));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(RailError::ParseError(e.to_string())))
        })
        .await?;

        let external_ref = response
            .get("transferId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RailError::ParseError("Response missing transferId".to_string()))?;

        Ok(TransferReceipt {
            external_ref: external_ref.to_string(),
        })
    }
}
