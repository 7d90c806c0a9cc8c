//! # Message Processor Router
//!
//! Dispatches a correlated inbound message to a type-specific processor and
//! re-emits the processor's output onto the router's own multicast sink,
//! which is the public-facing message stream of the WebSocket ingester.
//! Dispatch rule: exact key match on the inbound variant's lowercased tag
//! wins; otherwise the designated catch-all processor; with neither, the
//! message is dropped at debug level.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{MessageSink, Subscription};
use crate::ingesters::websocket::correlator::MessageCorrelation;
use crate::ingesters::websocket::message::InboundMessage;
use crate::ingesters::{MessageFilter, MessageHandler};
use crate::model::{EntityStateChange, Message, MessagePayload};

/// Capability implemented per inbound variant: turn a decoded frame into an
/// optional outbound [`Message`].
pub trait MessageProcessor: Send + Sync {
    fn process_message(&self, inbound: &InboundMessage) -> Option<Message>;
}

/// Type-keyed dispatch table over the closed inbound variant set.
pub struct ProcessorRouter {
    processors: HashMap<String, Arc<dyn MessageProcessor>>,
    catch_all: Option<Arc<dyn MessageProcessor>>,
    sink: MessageSink,
}

impl ProcessorRouter {
    pub fn new(sink: MessageSink) -> Self {
        Self {
            processors: HashMap::new(),
            catch_all: None,
            sink,
        }
    }

    pub fn register(mut self, tag: &str, processor: Arc<dyn MessageProcessor>) -> Self {
        self.processors.insert(tag.to_lowercase(), processor);
        self
    }

    pub fn register_catch_all(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.catch_all = Some(processor);
        self
    }

    /// Routes one correlated message. Never blocks the caller and never
    /// fails: a processor-produced message that overflows the sink is
    /// dropped by the sink's own policy.
    pub fn process(&self, correlation: &MessageCorrelation) {
        let tag = correlation.inbound.type_tag();
        let processor = self.processors.get(tag).or(self.catch_all.as_ref());
        match processor {
            Some(processor) => {
                if let Some(message) = processor.process_message(&correlation.inbound) {
                    self.sink.emit(message);
                }
            }
            None => {
                debug!(tag, "no processor registered, dropping message");
            }
        }
    }

    pub fn stream(&self) -> tokio::sync::mpsc::Receiver<Message> {
        self.sink.stream()
    }

    pub fn subscribe(&self, filter: MessageFilter, handler: MessageHandler) -> Subscription {
        self.sink.subscribe(filter, handler)
    }
}

/// Decodes `event` frames into domain payloads. State-change events become
/// typed [`EntityStateChange`] messages; anything else passes through as raw
/// JSON under the `event` topic.
pub struct EventMessageProcessor;

impl MessageProcessor for EventMessageProcessor {
    fn process_message(&self, inbound: &InboundMessage) -> Option<Message> {
        let InboundMessage::Event { event } = inbound else {
            return None;
        };
        match serde_json::from_value::<EntityStateChange>(event.clone()) {
            Ok(change) => Some(Message::normal(MessagePayload::EntityStateChange(change))),
            Err(_) => Some(Message::with_topic(
                "event",
                MessagePayload::Json(event.clone()),
            )),
        }
    }
}

/// Tracks the connection's authentication state from the auth handshake
/// variants; produces no output message.
pub struct AuthMessageProcessor {
    authenticated: Arc<AtomicBool>,
}

impl AuthMessageProcessor {
    pub fn new(authenticated: Arc<AtomicBool>) -> Self {
        Self { authenticated }
    }
}

impl MessageProcessor for AuthMessageProcessor {
    fn process_message(&self, inbound: &InboundMessage) -> Option<Message> {
        match inbound {
            InboundMessage::AuthOk { .. } => {
                self.authenticated.store(true, Ordering::SeqCst);
                info!("auth_ok :: authenticated=true");
            }
            InboundMessage::AuthRequired { .. } => {
                self.authenticated.store(false, Ordering::SeqCst);
                info!("auth_required :: authenticated=false");
            }
            InboundMessage::AuthInvalid { message } => {
                self.authenticated.store(false, Ordering::SeqCst);
                info!(reason = ?message, "auth_invalid :: authenticated=false");
            }
            _ => {}
        }
        None
    }
}

/// Catch-all processor: logs the variant and produces nothing.
pub struct InboundMessageProcessor;

impl MessageProcessor for InboundMessageProcessor {
    fn process_message(&self, inbound: &InboundMessage) -> Option<Message> {
        debug!(tag = inbound.type_tag(), "unhandled inbound message");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TagEchoProcessor;

    impl MessageProcessor for TagEchoProcessor {
        fn process_message(&self, inbound: &InboundMessage) -> Option<Message> {
            Some(Message::with_topic(
                inbound.type_tag(),
                MessagePayload::Json(json!({})),
            ))
        }
    }

    fn correlation(inbound: InboundMessage) -> MessageCorrelation {
        MessageCorrelation {
            request_id: None,
            request_type: None,
            inbound,
        }
    }

    #[tokio::test]
    async fn exact_match_wins_over_catch_all() {
        let router = ProcessorRouter::new(MessageSink::new(8))
            .register("pong", Arc::new(TagEchoProcessor))
            .register_catch_all(Arc::new(InboundMessageProcessor));
        let mut stream = router.stream();

        router.process(&correlation(InboundMessage::Pong {}));
        assert_eq!(stream.recv().await.unwrap().topic, "pong");
    }

    #[tokio::test]
    async fn unmatched_variant_falls_back_to_catch_all() {
        let router =
            ProcessorRouter::new(MessageSink::new(8)).register_catch_all(Arc::new(TagEchoProcessor));
        let mut stream = router.stream();

        router.process(&correlation(InboundMessage::Result {
            success: true,
            result: None,
            error: None,
        }));
        assert_eq!(stream.recv().await.unwrap().topic, "result");
    }

    #[tokio::test]
    async fn no_processor_and_no_catch_all_drops_silently() {
        let router = ProcessorRouter::new(MessageSink::new(8));
        let mut stream = router.stream();

        router.process(&correlation(InboundMessage::Pong {}));
        assert!(stream.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_processor_decodes_state_changes() {
        let event = json!({
            "event_type": "state_changed",
            "origin": "LOCAL",
            "time_fired": "2024-05-01T10:00:00Z",
            "data": {
                "old_state": {
                    "entity_id": "sensor.kitchen", "state": "1", "attributes": null,
                    "last_changed": "2024-05-01T10:00:00Z",
                    "last_updated": "2024-05-01T10:00:00Z"
                },
                "new_state": {
                    "entity_id": "sensor.kitchen", "state": "2", "attributes": null,
                    "last_changed": "2024-05-01T10:00:00Z",
                    "last_updated": "2024-05-01T10:00:00Z"
                }
            }
        });
        let message = EventMessageProcessor
            .process_message(&InboundMessage::Event { event })
            .unwrap();
        assert_eq!(message.topic, "EntityStateChange");
        assert!(matches!(
            message.payload,
            MessagePayload::EntityStateChange(_)
        ));
    }

    #[tokio::test]
    async fn event_processor_passes_unknown_events_through_as_json() {
        let message = EventMessageProcessor
            .process_message(&InboundMessage::Event {
                event: json!({"event_type": "automation_triggered"}),
            })
            .unwrap();
        assert_eq!(message.topic, "event");
    }

    #[tokio::test]
    async fn auth_processor_tracks_handshake_state() {
        let authenticated = Arc::new(AtomicBool::new(false));
        let processor = AuthMessageProcessor::new(Arc::clone(&authenticated));

        assert!(processor
            .process_message(&InboundMessage::AuthOk { ha_version: None })
            .is_none());
        assert!(authenticated.load(Ordering::SeqCst));

        processor.process_message(&InboundMessage::AuthInvalid {
            message: Some("bad token".into()),
        });
        assert!(!authenticated.load(Ordering::SeqCst));
    }
}
