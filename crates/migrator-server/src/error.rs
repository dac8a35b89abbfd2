//! Error handling for the control surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use migrator_core::PatternError;
use thiserror::Error;
use tracing::error;

use crate::json::{ApiResult, CODE_BAD_REQUEST, CODE_INTERNAL};

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Internal failure. The message is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
    /// Illegal input from the operator.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Internal(detail) => {
                error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResult::error(CODE_INTERNAL, "internal error"),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiResult::error(CODE_BAD_REQUEST, msg)),
        };

        (status, Json(body)).into_response()
    }
}

impl From<PatternError> for AppError {
    fn from(err: PatternError) -> Self {
        match err {
            PatternError::Unknown(_) | PatternError::IllegalTransition { .. } => {
                AppError::BadRequest(err.to_string())
            }
            PatternError::Corrupt(_) => AppError::Internal(err.to_string()),
        }
    }
}
