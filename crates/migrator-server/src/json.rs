//! JSON bodies for the control surface.

use migrator_core::{Direction, SchedulerStatus, ValidationReport, WritePattern};
use serde::{Deserialize, Serialize};

/// Success code.
pub const CODE_OK: i32 = 0;

/// Illegal input.
pub const CODE_BAD_REQUEST: i32 = 4;

/// Internal failure; details are only logged.
pub const CODE_INTERNAL: i32 = 5;

/// Envelope returned by every migrator endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResult<T> {
    /// Zero on success.
    pub code: i32,
    /// Human readable outcome.
    pub msg: String,
    /// Payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResult<T> {
    /// Successful result carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            msg: "OK".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResult<()> {
    /// Failure without payload.
    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Outcome of a pattern switch.
#[derive(Debug, Serialize, Deserialize)]
pub struct PatternChange {
    /// Pattern before the switch.
    pub previous: WritePattern,
    /// Pattern now active.
    pub current: WritePattern,
}

/// Outcome of starting a validation run.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunStarted {
    /// Authoritative side the run compares against.
    pub direction: Direction,
}

/// Incremental validation request.
#[derive(Debug, Serialize, Deserialize)]
pub struct IncrementalRequest {
    /// Watermark in milliseconds; rows with an older `utime` are skipped.
    /// Defaults to now.
    #[serde(default)]
    pub utime: Option<i64>,
    /// Pause in milliseconds once caught up.
    pub interval: u64,
}

/// Summary of a stopped run.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Whether a run was active.
    pub was_running: bool,
    /// Base rows visited.
    pub base_scanned: u64,
    /// Target rows visited.
    pub target_scanned: u64,
    /// Events emitted.
    pub events: u64,
    /// Lookups skipped after a failure.
    pub lookup_failures: u64,
    /// Events that could not be published.
    pub notify_failures: u64,
    /// A direction gave up after too many consecutive failures.
    pub aborted: bool,
    /// The run was stopped before it finished on its own.
    pub cancelled: bool,
}

impl From<Option<ValidationReport>> for RunSummary {
    fn from(report: Option<ValidationReport>) -> Self {
        match report {
            Some(report) => Self {
                was_running: true,
                base_scanned: report.base_scanned,
                target_scanned: report.target_scanned,
                events: report.events(),
                lookup_failures: report.lookup_failures,
                notify_failures: report.notify_failures,
                aborted: report.aborted,
                cancelled: report.cancelled,
            },
            None => Self {
                was_running: false,
                base_scanned: 0,
                target_scanned: 0,
                events: 0,
                lookup_failures: 0,
                notify_failures: 0,
                aborted: false,
                cancelled: false,
            },
        }
    }
}

/// Scheduler status.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Table being migrated.
    pub table: String,
    /// Active write pattern.
    pub pattern: WritePattern,
    /// A full pass is in progress.
    pub full_running: bool,
    /// An incremental run is tailing.
    pub incremental_running: bool,
    /// Authoritative side of the latest full run.
    pub full_direction: Option<Direction>,
    /// Authoritative side of the latest incremental run.
    pub incremental_direction: Option<Direction>,
}

impl StatusResponse {
    /// Build from a scheduler snapshot.
    pub fn new(table: &str, status: SchedulerStatus) -> Self {
        Self {
            table: table.to_string(),
            pattern: status.pattern,
            full_running: status.full_running,
            incremental_running: status.incremental_running,
            full_direction: status.full_direction,
            incremental_direction: status.incremental_direction,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Server version.
    pub version: String,
    /// Active write pattern, if readable.
    pub pattern: Option<WritePattern>,
}
