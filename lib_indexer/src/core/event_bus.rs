//! # Event Bus
//!
//! Process-wide typed publish/subscribe channel built on a tokio broadcast
//! channel. No persistence and no cross-subscriber ordering guarantee:
//! events published before a subscription exist only for earlier
//! subscribers, and a lagging receiver skips messages instead of blocking
//! the publisher.

use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{MessageEvent, SystemEvent};

/// Default broadcast buffer depth per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// The closed set of event types carried on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Message(MessageEvent),
    System(SystemEvent),
}

impl From<MessageEvent> for BusEvent {
    fn from(event: MessageEvent) -> Self {
        BusEvent::Message(event)
    }
}

impl From<SystemEvent> for BusEvent {
    fn from(event: SystemEvent) -> Self {
        BusEvent::System(event)
    }
}

/// In-process decoupling mechanism between ingestion and the indexers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Delivers the event to every live subscriber. Publishing with no
    /// subscribers is not an error; the event is simply lost.
    pub fn publish(&self, event: impl Into<BusEvent>) {
        let event = event.into();
        trace!(?event, "publishing bus event");
        let _ = self.sender.send(event);
    }

    /// Opens an independent subscription over all bus events. Callers match
    /// on the [`BusEvent`] variants they are interested in.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Typed helper: a stream of only the `MessageEvent`s on the bus.
    pub fn subscribe_messages(&self) -> tokio::sync::mpsc::Receiver<MessageEvent> {
        self.subscribe_filtered(|event| match event {
            BusEvent::Message(message) => Some(message),
            BusEvent::System(_) => None,
        })
    }

    /// Typed helper: a stream of only the `SystemEvent`s on the bus.
    pub fn subscribe_system(&self) -> tokio::sync::mpsc::Receiver<SystemEvent> {
        self.subscribe_filtered(|event| match event {
            BusEvent::System(system) => Some(system),
            BusEvent::Message(_) => None,
        })
    }

    fn subscribe_filtered<T, F>(&self, select: F) -> tokio::sync::mpsc::Receiver<T>
    where
        T: Send + 'static,
        F: Fn(BusEvent) -> Option<T> + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let (sender, typed) = tokio::sync::mpsc::channel(DEFAULT_BUS_CAPACITY);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Some(selected) = select(event) {
                            if sender.send(selected).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        typed
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
