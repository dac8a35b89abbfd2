//! Single-id validation driven by change signals.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{classify, ValidatorConfig, DEFAULT_LOOKUP_TIMEOUT, DEFAULT_NOTIFY_TIMEOUT};
use crate::entity::Entity;
use crate::error::Error;
use crate::event::{InconsistencyType, InconsistentEvent};
use crate::notifier::Notifier;
use crate::pattern::Direction;
use crate::storage::{Connection, Query};

/// A row changed and should be re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSignal {
    /// Id of the changed row.
    pub id: i64,
}

/// Change channel sender.
pub type ChangeSender = mpsc::Sender<ChangeSignal>;

/// Change channel receiver.
pub type ChangeReceiver = mpsc::Receiver<ChangeSignal>;

/// Create a new change channel with the given buffer size.
pub fn change_channel(buffer_size: usize) -> (ChangeSender, ChangeReceiver) {
    mpsc::channel(buffer_size)
}

/// Validates one id at a time instead of scanning.
pub struct EventDrivenValidator<T> {
    base: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    table: String,
    direction: Direction,
    notifier: Arc<dyn Notifier>,
    lookup_timeout: Duration,
    notify_timeout: Duration,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> EventDrivenValidator<T> {
    /// Create a validator for `table` with `base` authoritative.
    pub fn new(
        base: Arc<dyn Connection>,
        target: Arc<dyn Connection>,
        table: impl Into<String>,
        direction: Direction,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            base,
            target,
            table: table.into(),
            direction,
            notifier,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            _entity: PhantomData,
        }
    }

    /// Take deadlines from a scan configuration.
    pub fn with_config(mut self, config: &ValidatorConfig) -> Self {
        self.lookup_timeout = config.lookup_timeout;
        self.notify_timeout = config.notify_timeout;
        self
    }

    /// Classify one id without publishing anything.
    pub async fn classify(&self, id: i64) -> Result<Option<InconsistencyType>, Error> {
        let base = self.fetch(self.base.as_ref(), id).await?;
        let target = match self.fetch(self.target.as_ref(), id).await {
            Ok(target) => target,
            // An unreadable target row cannot equal the base row.
            Err(Error::Deserialization(_)) if base.is_some() => {
                return Ok(Some(InconsistencyType::Neq));
            }
            Err(err) => return Err(err),
        };
        Ok(classify(base.as_ref(), target.as_ref()))
    }

    /// Classify one id and publish an event if it drifted.
    ///
    /// Lookup failures are returned. A failed publish is logged and the event
    /// is still returned.
    pub async fn validate(&self, id: i64) -> Result<Option<InconsistentEvent>, Error> {
        let Some(kind) = self.classify(id).await? else {
            debug!(table = %self.table, id, "row consistent");
            return Ok(None);
        };

        let event = InconsistentEvent::new(id, self.direction, kind);
        match tokio::time::timeout(self.notify_timeout, self.notifier.produce(&event)).await {
            Ok(Ok(())) => debug!(table = %self.table, id, kind = %kind, "inconsistency reported"),
            Ok(Err(err)) => {
                warn!(table = %self.table, id, kind = %kind, error = %err, "failed to publish inconsistency")
            }
            Err(_) => warn!(table = %self.table, id, kind = %kind, "publishing inconsistency timed out"),
        }
        Ok(Some(event))
    }

    /// Validate every signalled id until the channel closes or `cancel` fires.
    pub async fn run(self, mut rx: ChangeReceiver, cancel: CancellationToken) {
        info!(table = %self.table, direction = %self.direction, "event-driven validator started");

        loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            if let Err(err) = self.validate(signal.id).await {
                warn!(table = %self.table, id = signal.id, error = %err, "single-id validation failed");
            }
        }

        info!(table = %self.table, "event-driven validator stopped");
    }

    /// Spawn [`run`](Self::run) and return the sender feeding it.
    pub fn spawn(self, buffer_size: usize, cancel: CancellationToken) -> (ChangeSender, JoinHandle<()>) {
        let (tx, rx) = change_channel(buffer_size);
        let handle = tokio::spawn(async move {
            self.run(rx, cancel).await;
        });
        (tx, handle)
    }

    async fn fetch(&self, conn: &dyn Connection, id: i64) -> Result<Option<T>, Error> {
        let lookup = Query::by_id(&self.table, id);
        let row = match tokio::time::timeout(self.lookup_timeout, conn.query_row(&lookup)).await {
            Ok(Ok(row)) => row,
            Ok(Err(Error::NoRows)) => return Ok(None),
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(Error::Timeout(self.lookup_timeout)),
        };
        row.decode().map(Some)
    }
}
