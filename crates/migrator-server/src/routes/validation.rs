//! Validation run endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use migrator_core::storage::key::current_millis;

use crate::error::AppError;
use crate::json::{ApiResult, IncrementalRequest, RunStarted, RunSummary, StatusResponse};
use crate::AppState;

/// Validation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/migrator/full/start", post(handle_full_start))
        .route("/migrator/full/stop", post(handle_full_stop))
        .route("/migrator/incr/start", post(handle_incr_start))
        .route("/migrator/incr/stop", post(handle_incr_stop))
        .route("/migrator/status", get(handle_status))
}

/// Start a full pass, replacing the one in progress.
async fn handle_full_start(
    State(state): State<AppState>,
) -> Result<Json<ApiResult<RunStarted>>, AppError> {
    let direction = state.scheduler.start_full_validation().await?;
    Ok(Json(ApiResult::ok(RunStarted { direction })))
}

async fn handle_full_stop(State(state): State<AppState>) -> Json<ApiResult<RunSummary>> {
    let report = state.scheduler.stop_full_validation().await;
    Json(ApiResult::ok(report.into()))
}

/// Start tailing from a watermark, replacing the incremental run in progress.
async fn handle_incr_start(
    State(state): State<AppState>,
    body: Result<Json<IncrementalRequest>, JsonRejection>,
) -> Result<Json<ApiResult<RunStarted>>, AppError> {
    let Json(req) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    if req.interval == 0 {
        return Err(AppError::BadRequest("interval must be positive".to_string()));
    }

    let direction = state
        .scheduler
        .start_incremental_validation(req.utime.unwrap_or_else(current_millis), req.interval)
        .await?;
    Ok(Json(ApiResult::ok(RunStarted { direction })))
}

async fn handle_incr_stop(State(state): State<AppState>) -> Json<ApiResult<RunSummary>> {
    let report = state.scheduler.stop_incremental_validation().await;
    Json(ApiResult::ok(report.into()))
}

async fn handle_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResult<StatusResponse>>, AppError> {
    let status = state.scheduler.status().await?;
    Ok(Json(ApiResult::ok(StatusResponse::new(&state.config.table, status))))
}
