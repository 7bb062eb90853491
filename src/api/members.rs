use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::AppState;
use crate::domain::{CommissionStatus, Member, MemberId, Slot};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub member_id: String,
    pub referrer_id: Option<String>,
    pub payout_destination: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub member_id: String,
    pub created: bool,
    pub slot: SlotDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDto {
    pub level: u8,
    pub index: u32,
}

impl From<Slot> for SlotDto {
    fn from(slot: Slot) -> Self {
        SlotDto {
            level: slot.level,
            index: slot.idx,
        }
    }
}

/// Signup: create the member row and claim a tree position.
///
/// Replays are safe: an existing member keeps their slot and referrer,
/// and the response is 200 instead of 201.
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    let member_id = parse_member_id(&body.member_id)?;
    let referrer_id = match body.referrer_id.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(rid) => Some(MemberId::new(rid.to_string())),
    };

    // A dangling referrer would silently drop every commission walk
    // through this member, so reject it up front.
    if let Some(rid) = &referrer_id {
        if state.repo.get_member(rid).await?.is_none() {
            return Err(AppError::BadRequest(format!("Unknown referrer {}", rid)));
        }
    }

    let mut member = Member::new(member_id.clone(), referrer_id.clone());
    member.payout_destination = body
        .payout_destination
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let created = state.repo.insert_member(&member).await?;
    if created {
        if let Some(rid) = &referrer_id {
            state.repo.increment_direct_referrals(rid).await?;
        }
    }

    let outcome = state
        .allocator
        .allocate(&member_id, referrer_id.as_ref())
        .await?;

    if created {
        info!(member = %member_id, slot = %outcome.slot, "Member signed up");
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SignupResponse {
            member_id: member_id.as_str().to_string(),
            created,
            slot: outcome.slot.into(),
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotDto>,
    pub active: bool,
    pub active_descendants: i64,
    pub total_descendants: i64,
    pub direct_referrals: i64,
    pub commission_rate: String,
    pub structure_no: i64,
    pub monthly_volume: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_destination: Option<String>,
    pub created_at_ms: i64,
}

impl From<Member> for MemberDto {
    fn from(m: Member) -> Self {
        MemberDto {
            member_id: m.member_id.as_str().to_string(),
            referrer_id: m.referrer_id.map(|r| r.as_str().to_string()),
            slot: m.slot.map(SlotDto::from),
            active: m.active,
            active_descendants: m.active_descendants,
            total_descendants: m.total_descendants,
            direct_referrals: m.direct_referrals,
            commission_rate: m.commission_rate.to_canonical_string(),
            structure_no: m.structure_no,
            monthly_volume: m.monthly_volume.to_canonical_string(),
            payout_destination: m.payout_destination,
            created_at_ms: m.created_at.as_ms(),
        }
    }
}

pub async fn get_member(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<MemberDto>, AppError> {
    let member_id = parse_member_id(&id)?;
    let member = state
        .repo
        .get_member(&member_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {} not found", member_id)))?;
    Ok(Json(member.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsResponse {
    pub entry_count: i64,
    pub total_amount: String,
    pub entries: Vec<CommissionEntryDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionEntryDto {
    pub entry_id: String,
    pub source_event_id: String,
    pub kind: String,
    pub amount: String,
    pub status: String,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub created_at_ms: i64,
}

pub async fn get_member_commissions(
    Path(id): Path<String>,
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<CommissionsResponse>, AppError> {
    let member_id = parse_member_id(&id)?;
    if state.repo.get_member(&member_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Member {} not found",
            member_id
        )));
    }

    let status = match params.status.as_deref() {
        Some("") | None => None,
        Some(s) => Some(
            CommissionStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("Invalid status {}", s)))?,
        ),
    };

    let entries = state
        .repo
        .entries_for_beneficiary(&member_id, status)
        .await?;

    let mut total_amount = crate::domain::Decimal::zero();
    for e in &entries {
        total_amount = total_amount + e.amount;
    }

    let entry_count = entries.len() as i64;
    let entries = entries
        .into_iter()
        .map(|e| CommissionEntryDto {
            entry_id: e.entry_id,
            source_event_id: e.source_event_id,
            kind: e.kind.as_str().to_string(),
            amount: e.amount.to_canonical_string(),
            status: e.status.as_str().to_string(),
            retry_count: e.retry_count,
            batch_id: e.batch_id,
            external_ref: e.external_ref,
            error_reason: e.error_reason,
            created_at_ms: e.created_at.as_ms(),
        })
        .collect();

    Ok(Json(CommissionsResponse {
        entry_count,
        total_amount: total_amount.to_canonical_string(),
        entries,
    }))
}

pub(super) fn parse_member_id(raw: &str) -> Result<MemberId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("memberId must not be empty".into()));
    }
    Ok(MemberId::new(trimmed.to_string()))
}
