//! Gateway webhook intake.
//!
//! The gateway delivers at least once, so both handlers answer 200 with a
//! `duplicate` flag instead of erroring on redelivery.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::members::parse_member_id;
use crate::api::AppState;
use crate::domain::{Decimal, PaymentEvent, PaymentKind, SubscriptionEvent, TimeMs};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    pub event_id: Option<String>,
    pub member_id: String,
    pub amount: Decimal,
    pub payment_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhookResponse {
    pub duplicate: bool,
    pub activated: bool,
    pub entries_created: usize,
}

pub async fn payment_event(
    State(state): State<AppState>,
    Json(body): Json<PaymentWebhook>,
) -> Result<Json<PaymentWebhookResponse>, AppError> {
    let member_id = parse_member_id(&body.member_id)?;
    if !body.amount.is_positive() {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    let kind = PaymentKind::from_str(&body.payment_type)
        .map_err(|_| AppError::BadRequest(format!("Invalid paymentType {}", body.payment_type)))?;

    let event = PaymentEvent::new(member_id, body.amount, kind, TimeMs::now(), body.event_id);
    let outcome = state.payments.handle_payment(&event).await?;

    Ok(Json(PaymentWebhookResponse {
        duplicate: outcome.duplicate,
        activated: outcome.activated,
        entries_created: outcome.entries_created,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionWebhook {
    pub event_id: Option<String>,
    pub member_id: String,
    pub active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionWebhookResponse {
    pub duplicate: bool,
    pub changed: bool,
}

pub async fn subscription_event(
    State(state): State<AppState>,
    Json(body): Json<SubscriptionWebhook>,
) -> Result<Json<SubscriptionWebhookResponse>, AppError> {
    let member_id = parse_member_id(&body.member_id)?;

    let event = SubscriptionEvent::new(member_id, body.active, TimeMs::now(), body.event_id);
    let outcome = state.payments.handle_subscription(&event).await?;

    Ok(Json(SubscriptionWebhookResponse {
        duplicate: outcome.duplicate,
        changed: outcome.changed,
    }))
}
