//! # Multicast Message Sink
//!
//! The hot stream every ingester publishes on. Each subscriber owns an
//! independent bounded queue, so a slow or absent consumer can never stall
//! the producer: when a queue is full the newest item for that subscriber is
//! dropped and the failure is logged. Consumers must therefore tolerate gaps.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::model::Message;

/// Default per-subscriber queue depth.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

struct SubscriberHandle {
    id: Uuid,
    sender: mpsc::Sender<Message>,
}

/// In-memory broadcast channel with a drop-newest overflow policy.
///
/// `emit` never blocks and never surfaces an error to the producer;
/// disconnected subscribers are pruned on the next emission.
#[derive(Clone)]
pub struct MessageSink {
    capacity: usize,
    subscribers: Arc<Mutex<Vec<SubscriberHandle>>>,
}

impl MessageSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fans the message out to every live subscriber.
    pub fn emit(&self, message: Message) {
        let mut subscribers = self.subscribers.lock().expect("sink lock poisoned");
        subscribers.retain(|subscriber| {
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(dropped)) => {
                    warn!(
                        subscriber = %subscriber.id,
                        topic = %dropped.topic,
                        "unable to emit message - subscriber queue full, dropping"
                    );
                    true
                }
                // Receiver was dropped; forget the subscriber.
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Attaches a new subscriber queue and returns its receiving half.
    ///
    /// Only messages emitted after this call are observed.
    pub fn stream(&self) -> mpsc::Receiver<Message> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.lock().expect("sink lock poisoned");
        subscribers.push(SubscriberHandle {
            id: Uuid::new_v4(),
            sender,
        });
        receiver
    }

    /// Installs a live subscription: a forwarding task reads this
    /// subscriber's queue and invokes `handler` for every message matching
    /// `filter`, in emission order.
    pub fn subscribe<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&Message) -> bool + Send + 'static,
        H: FnMut(Message) + Send + 'static,
    {
        let mut receiver = self.stream();
        let mut handler = handler;
        let task = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                if filter(&message) {
                    handler(message);
                }
            }
        });
        Subscription {
            id: Uuid::new_v4(),
            task,
        }
    }

    /// Convenience overload of [`subscribe`](Self::subscribe) with a
    /// match-all filter.
    pub fn subscribe_all<H>(&self, handler: H) -> Subscription
    where
        H: FnMut(Message) + Send + 'static,
    {
        self.subscribe(|_| true, handler)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("sink lock poisoned").len()
    }
}

impl Default for MessageSink {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY)
    }
}

/// Handle to one live subscription; owned by the subscriber and released by
/// explicit disposal.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Tears the subscription down. No further handler invocations occur
    /// after this returns.
    pub fn dispose(self) {
        self.task.abort();
    }
}
