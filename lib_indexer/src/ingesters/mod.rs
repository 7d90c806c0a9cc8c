//! # Message Ingesters
//!
//! An ingester adapts one external transport into the uniform [`Message`]
//! stream. Three variants exist: the authenticated WebSocket feed, the
//! fixed-rate REST poller, and the MQTT broker subscription. All of them
//! share one lifecycle contract: `start` establishes the transport and logs
//! (never propagates) failures, `stop` is a best-effort teardown that is
//! safe to call at any time, and the output stream is a restartable
//! multicast over which any number of subscribers observe every message.

pub mod mqtt;
pub mod rest;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::Subscription;
use crate::model::Message;

/// Boxed predicate used to scope a subscription to a subset of messages.
pub type MessageFilter = Box<dyn Fn(&Message) -> bool + Send + 'static>;

/// Boxed callback invoked for every matching message, in emission order.
pub type MessageHandler = Box<dyn FnMut(Message) + Send + 'static>;

/// Lifecycle and streaming contract implemented by every transport variant.
#[async_trait]
pub trait MessageIngester: Send + Sync {
    /// Logical source name; also used as the scheduler id for polled sources.
    fn name(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Establishes the transport-specific connection or registration.
    /// Idempotent when already running. On failure the error is logged and
    /// the ingester stays stopped; it is never propagated to the caller.
    async fn start(&self);

    /// Best-effort teardown; safe to call when not running and safe to call
    /// concurrently with an in-flight `start`.
    async fn stop(&self);

    /// Attaches a new queue over the ingester's output. Restartable across
    /// start/stop cycles: the stream outlives any single connection epoch.
    fn stream(&self) -> mpsc::Receiver<Message>;

    /// Installs an independent live subscription with a filter predicate.
    fn subscribe(&self, filter: MessageFilter, handler: MessageHandler) -> Subscription;

    /// Match-all convenience overload of [`subscribe`](Self::subscribe).
    fn subscribe_all(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(Box::new(|_| true), handler)
    }
}
