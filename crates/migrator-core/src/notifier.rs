//! Publishing inconsistency events.
//!
//! The message bus itself is external. [`Notifier`] is the seam the validator
//! publishes through; [`ChannelNotifier`] is an in-process bus backed by a
//! bounded tokio channel, drained by a [`FixConsumer`](crate::fixer::FixConsumer).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{EventError, InconsistentEvent, DEFAULT_TOPIC};

/// Notifier errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Event could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EventError),

    /// The bus is gone.
    #[error("bus closed")]
    Closed,
}

/// Publishes inconsistency events. Delivery is assumed at-least-once.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one event.
    async fn produce(&self, event: &InconsistentEvent) -> Result<(), NotifyError>;
}

/// A message on the in-process bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Encoded event.
    pub payload: Vec<u8>,
}

/// Bus channel sender.
pub type BusSender = mpsc::Sender<BusMessage>;

/// Bus channel receiver.
pub type BusReceiver = mpsc::Receiver<BusMessage>;

/// Create a new bus channel with the given buffer size.
pub fn channel(buffer_size: usize) -> (BusSender, BusReceiver) {
    mpsc::channel(buffer_size)
}

/// Notifier that publishes encoded events onto an in-process bus channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    topic: String,
    tx: BusSender,
}

impl ChannelNotifier {
    /// Publish to the default topic.
    pub fn new(tx: BusSender) -> Self {
        Self::with_topic(DEFAULT_TOPIC, tx)
    }

    /// Publish to a specific topic.
    pub fn with_topic(topic: impl Into<String>, tx: BusSender) -> Self {
        Self {
            topic: topic.into(),
            tx,
        }
    }

    /// The topic events are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn produce(&self, event: &InconsistentEvent) -> Result<(), NotifyError> {
        let payload = event.encode()?;
        debug!(topic = %self.topic, id = event.id, kind = %event.kind, "publishing inconsistency");
        self.tx
            .send(BusMessage {
                topic: self.topic.clone(),
                payload,
            })
            .await
            .map_err(|_| NotifyError::Closed)
    }
}
