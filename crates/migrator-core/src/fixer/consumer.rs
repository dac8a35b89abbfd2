//! Bus consumer that feeds events to the fixers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FixError, FixOutcome, OverrideFixer};
use crate::entity::Entity;
use crate::event::{InconsistentEvent, DEFAULT_TOPIC};
use crate::notifier::{BusMessage, BusReceiver};
use crate::pattern::Direction;
use crate::storage::Connection;

/// Drains the inconsistency topic and repairs each event.
///
/// Events carry the side that was authoritative when they were found, so the
/// consumer keeps one fixer per side and dispatches on `direction`.
pub struct FixConsumer<T> {
    rx: BusReceiver,
    dispatch: Dispatch<T>,
}

struct Dispatch<T> {
    topic: String,
    src_authoritative: OverrideFixer<T>,
    dst_authoritative: OverrideFixer<T>,
}

impl<T: Entity> FixConsumer<T> {
    /// Create a consumer for `table` on the default topic.
    pub fn new(
        rx: BusReceiver,
        src: Arc<dyn Connection>,
        dst: Arc<dyn Connection>,
        table: impl Into<String>,
    ) -> Self {
        let table = table.into();
        Self {
            rx,
            dispatch: Dispatch {
                topic: DEFAULT_TOPIC.to_string(),
                src_authoritative: OverrideFixer::new(src.clone(), dst.clone(), table.clone()),
                dst_authoritative: OverrideFixer::new(dst, src, table),
            },
        }
    }

    /// Only consume messages published to `topic`.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.dispatch.topic = topic.into();
        self
    }

    /// Decode and repair one message.
    ///
    /// Returns `Ok(None)` for messages on other topics.
    pub async fn handle(&self, msg: &BusMessage) -> Result<Option<FixOutcome>, FixError> {
        self.dispatch.handle(msg).await
    }

    /// Run until the bus closes or `cancel` fires. A failed repair is logged
    /// and the next message is processed.
    pub async fn run(self, cancel: CancellationToken) {
        let FixConsumer { mut rx, dispatch } = self;
        let table = dispatch.src_authoritative.table();
        info!(topic = %dispatch.topic, table, "fix consumer started");

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(err) = dispatch.handle(&msg).await {
                warn!(topic = %msg.topic, table, error = %err, "failed to repair inconsistency");
            }
        }

        info!(topic = %dispatch.topic, "fix consumer stopped");
    }
}

impl<T: Entity> Dispatch<T> {
    async fn handle(&self, msg: &BusMessage) -> Result<Option<FixOutcome>, FixError> {
        if msg.topic != self.topic {
            debug!(topic = %msg.topic, "ignoring message on foreign topic");
            return Ok(None);
        }

        let event = InconsistentEvent::decode(&msg.payload)?;
        let fixer = match event.direction {
            Direction::Src => &self.src_authoritative,
            Direction::Dst => &self.dst_authoritative,
        };
        fixer.fix(&event).await.map(Some)
    }
}

/// Start a fix consumer as a background task.
pub fn start_consumer<T: Entity>(consumer: FixConsumer<T>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        consumer.run(cancel).await;
    })
}
