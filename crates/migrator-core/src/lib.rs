//! Migrator Core - Online table migration between two stores.
//!
//! This crate provides the pieces needed to move a table from a source store to
//! a destination store without downtime: a dual-write connection proxy driven by
//! a phased write pattern, a bidirectional reconciliation validator, a fixer
//! that repairs reported drift, and a scheduler tying them together.

pub mod entity;
pub mod error;
pub mod event;
pub mod fixer;
pub mod notifier;
pub mod pattern;
pub mod proxy;
pub mod scheduler;
pub mod storage;
pub mod validator;

#[cfg(test)]
mod testing;

pub use entity::{Entity, JsonRecord};
pub use error::Error;
pub use event::{EventError, InconsistencyType, InconsistentEvent, DEFAULT_TOPIC};
pub use fixer::{start_consumer, FixConsumer, FixError, FixOutcome, OverrideFixer};
pub use notifier::{BusMessage, BusReceiver, BusSender, ChannelNotifier, Notifier, NotifyError};
pub use pattern::{Direction, PatternCell, PatternError, TransitionPolicy, WritePattern};
pub use proxy::{DoubleWritePool, DoubleWriteTransaction};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStatus};
pub use storage::{
    Connection, ExecResult, PreparedStatement, Query, Row, SledPool, Statement, StorageConfig,
    Transaction,
};

// Validator exports
pub use validator::{
    ChangeSignal, EventDrivenValidator, ScanMode, ValidationReport, Validator, ValidatorConfig,
};
