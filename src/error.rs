use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::domain::PeriodParseError;
use crate::engine::AllocationError;
use crate::orchestration::{CycleError, IntakeError, PayoutError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        match err {
            // global capacity reached, an operator problem rather than a
            // caller problem
            AllocationError::TreeExhausted => AppError::Internal(err.to_string()),
            AllocationError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::MemberNotFound(_) => AppError::NotFound(err.to_string()),
            IntakeError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<PayoutError> for AppError {
    fn from(err: PayoutError) -> Self {
        match err {
            PayoutError::BatchNotFound(_) => AppError::NotFound(err.to_string()),
            PayoutError::BatchAlreadyProcessing(_) | PayoutError::WrongBatchState { .. } => {
                AppError::Conflict(err.to_string())
            }
            PayoutError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<CycleError> for AppError {
    fn from(err: CycleError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::UnknownToken => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::Forbidden { .. } => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<PeriodParseError> for AppError {
    fn from(err: PeriodParseError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
