//! Operator commands. Every route checks a bearer token against the
//! capability it needs before touching state.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::members::{parse_member_id, SlotDto};
use crate::api::AppState;
use crate::auth::{authorize, Capability};
use crate::domain::{CommissionDraft, CommissionKind, Decimal, Period};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub member_id: String,
    pub referrer_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateResponse {
    pub member_id: String,
    pub slot: SlotDto,
    pub newly_placed: bool,
}

/// Place an existing member, e.g. one imported before the tree went live.
pub async fn allocate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, AppError> {
    authorize(&state.admin_tokens, &headers, Capability::Allocate)?;

    let member_id = parse_member_id(&body.member_id)?;
    if state.repo.get_member(&member_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Member {} not found",
            member_id
        )));
    }
    let referrer_id = match body.referrer_id.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(rid) => Some(parse_member_id(rid)?),
    };

    let outcome = state
        .allocator
        .allocate(&member_id, referrer_id.as_ref())
        .await?;

    Ok(Json(AllocateResponse {
        member_id: member_id.as_str().to_string(),
        slot: outcome.slot.into(),
        newly_placed: outcome.newly_placed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeRequest {
    pub member_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeResponse {
    pub member_id: String,
    pub active_descendants: i64,
    pub corrected: bool,
    pub commission_rate: String,
    pub structure_no: i64,
}

/// Re-derive a member's active-descendant count from the slot table and
/// refresh the cached rate and structure number from it. Heals counters
/// left behind by a crash mid-propagation.
pub async fn recompute_rates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RecomputeRequest>,
) -> Result<Json<RecomputeResponse>, AppError> {
    authorize(&state.admin_tokens, &headers, Capability::RecomputeRates)?;

    let member_id = parse_member_id(&body.member_id)?;
    let member = state
        .repo
        .get_member(&member_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {} not found", member_id)))?;

    let mut corrected = false;
    if let Some(slot) = member.slot {
        let recount = state.repo.recount_active_descendants(slot).await?;
        let drift = recount - member.active_descendants;
        if drift != 0 {
            info!(
                member = %member_id,
                stored = member.active_descendants,
                recount,
                "Correcting active-descendant drift"
            );
            state.repo.adjust_active_descendants(slot, drift).await?;
            corrected = true;
        }
    }
    state.propagator.refresh_rate(&member_id).await?;

    let member = state
        .repo
        .get_member(&member_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Member {} vanished", member_id)))?;

    Ok(Json(RecomputeResponse {
        member_id: member_id.as_str().to_string(),
        active_descendants: member.active_descendants,
        corrected,
        commission_rate: member.commission_rate.to_canonical_string(),
        structure_no: member.structure_no,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPayoutRequest {
    pub member_id: String,
    pub amount: Decimal,
    pub note: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPayoutResponse {
    pub entry_id: String,
    pub member_id: String,
    pub amount: String,
    pub status: String,
}

/// Credit an operator adjustment as a `manual` ledger entry. It flows
/// through the same batch pipeline as earned commissions.
pub async fn manual_payout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ManualPayoutRequest>,
) -> Result<(StatusCode, Json<ManualPayoutResponse>), AppError> {
    let role = authorize(&state.admin_tokens, &headers, Capability::CreateManualPayout)?;

    let member_id = parse_member_id(&body.member_id)?;
    if state.repo.get_member(&member_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Member {} not found",
            member_id
        )));
    }
    if !body.amount.is_positive() {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }

    let draft = CommissionDraft {
        source_event_id: format!("manual:{}", Uuid::new_v4()),
        beneficiary_id: member_id.clone(),
        kind: CommissionKind::Manual,
        amount: body.amount.round_cents(),
    };
    let inserted = state.repo.record_commissions(&[draft]).await?;
    let entry = inserted
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal("Manual payout entry was not created".into()))?;

    info!(
        member = %member_id,
        amount = %entry.amount,
        %role,
        note = %body.note,
        "Manual payout created"
    );

    Ok((
        StatusCode::CREATED,
        Json(ManualPayoutResponse {
            entry_id: entry.entry_id,
            member_id: member_id.as_str().to_string(),
            amount: entry.amount.to_canonical_string(),
            status: entry.status.as_str().to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPlanDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub entry_count: usize,
    pub beneficiary_count: usize,
    pub total_amount: String,
    pub requeued: u64,
    pub cancelled: u64,
    pub held_unqualified: usize,
    pub held_below_threshold: usize,
    pub deferred_over_cap: usize,
}

pub async fn plan_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BatchPlanDto>, AppError> {
    authorize(&state.admin_tokens, &headers, Capability::PlanBatch)?;

    let plan = state.payouts.plan_batch().await?;
    Ok(Json(BatchPlanDto {
        batch_id: plan.batch_id,
        entry_count: plan.entry_count,
        beneficiary_count: plan.beneficiary_count,
        total_amount: plan.total_amount.to_canonical_string(),
        requeued: plan.requeued,
        cancelled: plan.cancelled,
        held_unqualified: plan.held_unqualified,
        held_below_threshold: plan.held_below_threshold,
        deferred_over_cap: plan.deferred_over_cap,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReportDto {
    pub batch_id: String,
    pub transfers: usize,
    pub paid_entries: usize,
    pub failed_entries: usize,
    pub total_paid: String,
}

pub async fn trigger_batch(
    Path(batch_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BatchReportDto>, AppError> {
    authorize(&state.admin_tokens, &headers, Capability::TriggerBatch)?;

    let report = state.payouts.trigger_batch(&batch_id).await?;
    Ok(Json(BatchReportDto {
        batch_id: report.batch_id,
        transfers: report.transfers,
        paid_entries: report.paid_entries,
        failed_entries: report.failed_entries,
        total_paid: report.total_paid.to_canonical_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub batch_id: String,
    pub released: u64,
}

pub async fn resolve_batch(
    Path(batch_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResolveResponse>, AppError> {
    authorize(&state.admin_tokens, &headers, Capability::ResolveBatch)?;

    let report = state.payouts.resolve_stuck_batch(&batch_id).await?;
    Ok(Json(ResolveResponse {
        batch_id: report.batch_id,
        released: report.released,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRequest {
    pub period: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResponse {
    pub period: String,
    pub dry_run: bool,
    pub archived: usize,
    pub skipped: usize,
    pub credited: usize,
    pub total_credited: String,
}

pub async fn run_cycle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CycleRequest>,
) -> Result<Json<CycleResponse>, AppError> {
    let role = authorize(&state.admin_tokens, &headers, Capability::TriggerMonthlyCycle)?;

    let period = Period::parse(&body.period)?;
    info!(%period, dry_run = body.dry_run, %role, "Monthly cycle requested");

    let report = state.cycle.run(&period, body.dry_run).await?;
    Ok(Json(CycleResponse {
        period: period.as_str().to_string(),
        dry_run: body.dry_run,
        archived: report.archived,
        skipped: report.skipped,
        credited: report.credited,
        total_credited: report.total_credited.to_canonical_string(),
    }))
}
