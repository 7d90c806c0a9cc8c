//! # Message Correlator
//!
//! Pairs an asynchronous inbound frame with the outbound request that
//! solicited it, by shared correlation id, and decodes the frame's payload
//! into a typed [`InboundMessage`]. The pending table is bounded: a
//! correlated entry is retired on lookup, and when the table is full the
//! oldest registration is evicted so a lost response cannot leak memory for
//! the life of the connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::IngestError;
use crate::ingesters::websocket::message::{InboundMessage, ParsedMessage};

/// Default bound on the number of in-flight outbound requests.
pub const DEFAULT_PENDING_CAPACITY: usize = 1024;

/// An outbound request recorded at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub id: u64,
    pub type_tag: String,
}

/// The result of correlating one inbound frame: the originating request (if
/// any) and the decoded inbound variant. Unsolicited frames carry `None`
/// request fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCorrelation {
    pub request_id: Option<u64>,
    pub request_type: Option<String>,
    pub inbound: InboundMessage,
}

struct PendingTable {
    entries: HashMap<u64, String>,
    order: VecDeque<u64>,
}

/// Request/response matcher for one WebSocket connection.
///
/// The pending table is the only mutable state shared between the send path
/// and the (single-threaded) receive path, hence the mutex.
pub struct MessageCorrelator {
    capacity: usize,
    pending: Mutex<PendingTable>,
}

impl MessageCorrelator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: Mutex::new(PendingTable {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Records a newly assigned outbound request. Callers must register
    /// before transmitting the frame so a fast round-trip cannot race ahead
    /// of registration.
    pub fn register_outbound(&self, request: OutboundRequest) {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        while pending.entries.len() >= self.capacity {
            if let Some(oldest) = pending.order.pop_front() {
                if pending.entries.remove(&oldest).is_some() {
                    warn!(id = oldest, "pending table full, evicting oldest outbound request");
                }
            } else {
                break;
            }
        }
        pending.order.push_back(request.id);
        pending.entries.insert(request.id, request.type_tag);
    }

    /// Matches `parsed` against the pending table (retiring the entry on a
    /// hit) and decodes its payload against the closed inbound variant set.
    /// An unrecognized type tag is a decode failure; the caller drops the
    /// frame and keeps the connection up.
    pub fn correlate(&self, parsed: ParsedMessage) -> Result<MessageCorrelation, IngestError> {
        let request = parsed.id.and_then(|id| self.take(id));
        let inbound: InboundMessage =
            serde_json::from_value(parsed.payload).map_err(|source| {
                info!(type_tag = %parsed.type_tag, "unknown or undecodable message type");
                IngestError::UnknownMessageType {
                    type_tag: parsed.type_tag.clone(),
                    source,
                }
            })?;
        Ok(MessageCorrelation {
            request_id: request.as_ref().map(|r| r.id),
            request_type: request.map(|r| r.type_tag),
            inbound,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .entries
            .len()
    }

    fn take(&self, id: u64) -> Option<OutboundRequest> {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        let type_tag = pending.entries.remove(&id)?;
        pending.order.retain(|&queued| queued != id);
        Some(OutboundRequest { id, type_tag })
    }
}

impl Default for MessageCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingesters::websocket::message::parse_frame;

    fn correlator() -> MessageCorrelator {
        MessageCorrelator::new(8)
    }

    #[test]
    fn correlates_a_response_with_its_registered_request() {
        let correlator = correlator();
        correlator.register_outbound(OutboundRequest {
            id: 7,
            type_tag: "ping".into(),
        });

        let parsed = parse_frame(r#"{"id": 7, "type": "pong"}"#).unwrap();
        let correlation = correlator.correlate(parsed).unwrap();

        assert_eq!(correlation.request_id, Some(7));
        assert_eq!(correlation.request_type.as_deref(), Some("ping"));
        assert_eq!(correlation.inbound, InboundMessage::Pong {});
    }

    #[test]
    fn unsolicited_frames_carry_no_request_fields() {
        let correlator = correlator();
        let parsed =
            parse_frame(r#"{"type": "event", "event": {"event_type": "state_changed"}}"#).unwrap();
        let correlation = correlator.correlate(parsed).unwrap();

        assert_eq!(correlation.request_id, None);
        assert_eq!(correlation.request_type, None);
        assert!(matches!(correlation.inbound, InboundMessage::Event { .. }));
    }

    #[test]
    fn unknown_type_tag_is_a_decode_failure() {
        let correlator = correlator();
        let parsed = parse_frame(r#"{"type": "bogus", "payload": {}}"#).unwrap();
        let err = correlator.correlate(parsed).unwrap_err();
        assert!(
            matches!(err, IngestError::UnknownMessageType { ref type_tag, .. } if type_tag == "bogus")
        );
    }

    #[test]
    fn correlated_entries_are_retired_on_lookup() {
        let correlator = correlator();
        correlator.register_outbound(OutboundRequest {
            id: 3,
            type_tag: "get_config".into(),
        });
        assert_eq!(correlator.pending_count(), 1);

        let first = correlator
            .correlate(parse_frame(r#"{"id": 3, "type": "result", "success": true}"#).unwrap())
            .unwrap();
        assert_eq!(first.request_type.as_deref(), Some("get_config"));
        assert_eq!(correlator.pending_count(), 0);

        // A duplicate response for the same id no longer matches anything.
        let second = correlator
            .correlate(parse_frame(r#"{"id": 3, "type": "result", "success": true}"#).unwrap())
            .unwrap();
        assert_eq!(second.request_id, None);
        assert_eq!(second.request_type, None);
    }

    #[test]
    fn full_table_evicts_the_oldest_registration() {
        let correlator = MessageCorrelator::new(2);
        for id in 1..=3 {
            correlator.register_outbound(OutboundRequest {
                id,
                type_tag: "ping".into(),
            });
        }
        assert_eq!(correlator.pending_count(), 2);

        // id=1 was evicted; its late response is treated as unsolicited.
        let late = correlator
            .correlate(parse_frame(r#"{"id": 1, "type": "pong"}"#).unwrap())
            .unwrap();
        assert_eq!(late.request_id, None);

        let kept = correlator
            .correlate(parse_frame(r#"{"id": 3, "type": "pong"}"#).unwrap())
            .unwrap();
        assert_eq!(kept.request_id, Some(3));
    }
}
