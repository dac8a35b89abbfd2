//! Reconciliation between the base and target stores.
//!
//! [`Validator`] scans both directions of one table concurrently:
//!
//! - **base to target** walks base in id order one row at a time and looks each
//!   id up in target, reporting `target_missing` or `neq`;
//! - **target to base** walks target in batches and resolves each batch against
//!   base with a single IN-list lookup, reporting `base_missing`.
//!
//! [`EventDrivenValidator`] applies the same classification to single ids as
//! change signals arrive.
//!
//! Neither variant repairs anything; drift is published through a
//! [`Notifier`](crate::notifier::Notifier) and repaired by the fixer.

mod config;
mod event_driven;
mod scan;

pub use config::{
    ScanMode, ValidatorConfig, DEFAULT_BATCH_SIZE, DEFAULT_LOOKUP_TIMEOUT,
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_NOTIFY_TIMEOUT,
};
pub use event_driven::{change_channel, ChangeReceiver, ChangeSender, ChangeSignal, EventDrivenValidator};
pub use scan::Validator;

use crate::entity::Entity;
use crate::event::InconsistencyType;

/// Three-way classification of one id given what each store holds.
pub fn classify<T: Entity>(base: Option<&T>, target: Option<&T>) -> Option<InconsistencyType> {
    match (base, target) {
        (Some(_), None) => Some(InconsistencyType::TargetMissing),
        (None, Some(_)) => Some(InconsistencyType::BaseMissing),
        (Some(base), Some(target)) if !base.compare_to(target) => Some(InconsistencyType::Neq),
        _ => None,
    }
}

/// Counters for one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Base rows visited by the base-to-target scan.
    pub base_scanned: u64,
    /// Target rows visited by the target-to-base scan.
    pub target_scanned: u64,
    /// `target_missing` events emitted.
    pub target_missing: u64,
    /// `base_missing` events emitted.
    pub base_missing: u64,
    /// `neq` events emitted.
    pub neq: u64,
    /// Lookups that failed or timed out and were skipped.
    pub lookup_failures: u64,
    /// Events that could not be published.
    pub notify_failures: u64,
    /// A direction gave up because its store stayed unreachable.
    pub aborted: bool,
    /// The pass was cancelled before finishing.
    pub cancelled: bool,
}

impl ValidationReport {
    /// Total events emitted.
    pub fn events(&self) -> u64 {
        self.target_missing + self.base_missing + self.neq
    }

    pub(crate) fn record(&mut self, kind: InconsistencyType) {
        match kind {
            InconsistencyType::TargetMissing => self.target_missing += 1,
            InconsistencyType::BaseMissing => self.base_missing += 1,
            InconsistencyType::Neq => self.neq += 1,
        }
    }

    pub(crate) fn merge(mut self, other: ValidationReport) -> Self {
        self.base_scanned += other.base_scanned;
        self.target_scanned += other.target_scanned;
        self.target_missing += other.target_missing;
        self.base_missing += other.base_missing;
        self.neq += other.neq;
        self.lookup_failures += other.lookup_failures;
        self.notify_failures += other.notify_failures;
        self.aborted |= other.aborted;
        self.cancelled |= other.cancelled;
        self
    }
}
