//! Migrator control server.
//!
//! This crate exposes the migration scheduler over HTTP/JSON so that an
//! operator can walk a table through the write patterns and start or stop
//! validation runs.
//!
//! Switching patterns only redirects application traffic when the application
//! writes through the pool returned by [`Scheduler::pool`]. The standalone
//! binary has no such traffic of its own, so there a switch only decides which
//! side validation treats as authoritative.

pub mod config;
pub mod error;
pub mod json;
pub mod routes;

pub use config::{Args, ServerConfig};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use migrator_core::{JsonRecord, Scheduler};
use tower_http::trace::TraceLayer;

/// Scheduler over schemaless records.
pub type RecordScheduler = Scheduler<JsonRecord>;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Migration scheduler.
    pub scheduler: Arc<RecordScheduler>,
    /// Server configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(scheduler: Arc<RecordScheduler>, config: ServerConfig) -> Self {
        Self { scheduler, config }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::routes())
        .merge(routes::pattern::routes())
        .merge(routes::validation::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
