//! Write pattern endpoints.

use axum::{extract::State, routing::post, Json, Router};
use migrator_core::WritePattern;

use crate::error::AppError;
use crate::json::{ApiResult, PatternChange};
use crate::AppState;

/// Pattern switch routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/migrator/src_only", post(handle_src_only))
        .route("/migrator/src_first", post(handle_src_first))
        .route("/migrator/dst_first", post(handle_dst_first))
        .route("/migrator/dst_only", post(handle_dst_only))
}

type PatternResult = Result<Json<ApiResult<PatternChange>>, AppError>;

async fn handle_src_only(State(state): State<AppState>) -> PatternResult {
    switch(&state, WritePattern::SrcOnly)
}

async fn handle_src_first(State(state): State<AppState>) -> PatternResult {
    switch(&state, WritePattern::SrcFirst)
}

async fn handle_dst_first(State(state): State<AppState>) -> PatternResult {
    switch(&state, WritePattern::DstFirst)
}

async fn handle_dst_only(State(state): State<AppState>) -> PatternResult {
    switch(&state, WritePattern::DstOnly)
}

fn switch(state: &AppState, pattern: WritePattern) -> PatternResult {
    let previous = state.scheduler.set_pattern(pattern)?;
    Ok(Json(ApiResult::ok(PatternChange {
        previous,
        current: pattern,
    })))
}
