//! Repairing reported drift.
//!
//! An [`OverrideFixer`] makes the non-authoritative store agree with the
//! authoritative one for a single id. Every repair re-reads the authoritative
//! store first, so replaying an event is harmless.

mod consumer;

pub use consumer::{start_consumer, FixConsumer};

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::entity::Entity;
use crate::error::Error;
use crate::event::{EventError, InconsistencyType, InconsistentEvent};
use crate::storage::{Connection, Query, Statement};

/// Fixer errors.
#[derive(Debug, Error)]
pub enum FixError {
    /// A store operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] Error),

    /// The event names a drift kind this fixer does not know.
    #[error("unknown inconsistency type: {0}")]
    UnknownType(String),

    /// The event payload could not be decoded.
    #[error("undecodable event: {0}")]
    Decode(EventError),
}

impl From<EventError> for FixError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::UnknownType(kind) => FixError::UnknownType(kind),
            other => FixError::Decode(other),
        }
    }
}

/// What a repair did to the non-authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// The authoritative row was written over the other store's copy.
    Upserted,
    /// The id was removed from the other store.
    Deleted,
}

/// Overwrites `target` with whatever `base` holds.
pub struct OverrideFixer<T> {
    base: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    table: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> OverrideFixer<T> {
    /// Create a fixer with `base` authoritative.
    pub fn new(base: Arc<dyn Connection>, target: Arc<dyn Connection>, table: impl Into<String>) -> Self {
        Self {
            base,
            target,
            table: table.into(),
            _entity: PhantomData,
        }
    }

    /// Table this fixer repairs.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Repair one event.
    pub async fn fix(&self, event: &InconsistentEvent) -> Result<FixOutcome, FixError> {
        let outcome = match event.kind {
            InconsistencyType::TargetMissing | InconsistencyType::Neq => self.sync(event.id).await?,
            InconsistencyType::BaseMissing => self.remove(event.id).await?,
        };

        info!(
            table = %self.table,
            id = event.id,
            direction = %event.direction,
            kind = %event.kind,
            outcome = ?outcome,
            "inconsistency repaired"
        );
        Ok(outcome)
    }

    /// Decode a wire payload and repair it.
    pub async fn fix_payload(&self, payload: &[u8]) -> Result<FixOutcome, FixError> {
        let event = InconsistentEvent::decode(payload)?;
        self.fix(&event).await
    }

    async fn sync(&self, id: i64) -> Result<FixOutcome, Error> {
        let row = match self.base.query_row(&Query::by_id(&self.table, id)).await {
            Ok(row) => row,
            Err(Error::NoRows) => {
                // Gone from base since it was reported.
                debug!(table = %self.table, id, "authoritative row vanished, deleting copy");
                return self.remove(id).await;
            }
            Err(err) => return Err(err),
        };

        let entity: T = row.decode()?;
        self.target.exec(&Statement::upsert(&self.table, &entity)?).await?;
        Ok(FixOutcome::Upserted)
    }

    async fn remove(&self, id: i64) -> Result<FixOutcome, Error> {
        self.target.exec(&Statement::delete(&self.table, id)).await?;
        Ok(FixOutcome::Deleted)
    }
}
