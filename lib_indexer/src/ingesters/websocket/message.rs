//! Wire frames exchanged with the WebSocket feed. Field names (`id`,
//! `type`, ...) are fixed by the external protocol and must be preserved
//! exactly.

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// The transient shape extracted from every inbound text frame before
/// correlation: optional correlation id, type tag and the raw payload tree.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub id: Option<u64>,
    pub type_tag: String,
    pub payload: serde_json::Value,
}

/// Extracts the `{id?, type, ...}` envelope from a raw text frame.
pub fn parse_frame(raw: &str) -> Result<ParsedMessage, IngestError> {
    let payload: serde_json::Value =
        serde_json::from_str(raw).map_err(IngestError::MalformedFrame)?;
    let id = payload.get("id").and_then(|v| v.as_u64());
    let type_tag = payload
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(IngestError::MissingField("type"))?
        .to_string();
    Ok(ParsedMessage {
        id,
        type_tag,
        payload,
    })
}

/// Closed set of inbound frame variants, keyed by the wire `type` tag.
/// Unknown tags are a hard decode failure, not a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Event {
        event: serde_json::Value,
    },
    Pong {},
    Result {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<serde_json::Value>,
    },
}

impl InboundMessage {
    /// The lowercased wire tag; also the processor router's dispatch key.
    pub fn type_tag(&self) -> &'static str {
        match self {
            InboundMessage::AuthRequired { .. } => "auth_required",
            InboundMessage::AuthOk { .. } => "auth_ok",
            InboundMessage::AuthInvalid { .. } => "auth_invalid",
            InboundMessage::Event { .. } => "event",
            InboundMessage::Pong {} => "pong",
            InboundMessage::Result { .. } => "result",
        }
    }
}

/// Outbound request frames. The correlation id is attached at send time via
/// [`OutboundFrame`]; the auth frame alone is sent without one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth { access_token: String },
    Ping {},
    GetConfig {},
    GetPanels {},
    GetStates {},
    SubscribeEvents { event_type: String },
    UnsubscribeEvents { subscription: u64 },
}

impl OutboundMessage {
    pub fn type_tag(&self) -> &'static str {
        match self {
            OutboundMessage::Auth { .. } => "auth",
            OutboundMessage::Ping {} => "ping",
            OutboundMessage::GetConfig {} => "get_config",
            OutboundMessage::GetPanels {} => "get_panels",
            OutboundMessage::GetStates {} => "get_states",
            OutboundMessage::SubscribeEvents { .. } => "subscribe_events",
            OutboundMessage::UnsubscribeEvents { .. } => "unsubscribe_events",
        }
    }
}

/// A request frame with its correlation id, as written to the wire.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    pub id: u64,
    #[serde(flatten)]
    pub message: OutboundMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_frame_extracts_id_and_type() {
        let parsed = parse_frame(r#"{"id": 7, "type": "pong"}"#).unwrap();
        assert_eq!(parsed.id, Some(7));
        assert_eq!(parsed.type_tag, "pong");
    }

    #[test]
    fn parse_frame_tolerates_missing_id() {
        let parsed = parse_frame(r#"{"type": "event", "event": {}}"#).unwrap();
        assert_eq!(parsed.id, None);
        assert_eq!(parsed.type_tag, "event");
    }

    #[test]
    fn parse_frame_rejects_frames_without_a_type() {
        let err = parse_frame(r#"{"id": 1}"#).unwrap_err();
        assert!(matches!(err, IngestError::MissingField("type")));
    }

    #[test]
    fn parse_frame_rejects_non_json() {
        let err = parse_frame("not json").unwrap_err();
        assert!(matches!(err, IngestError::MalformedFrame(_)));
    }

    #[test]
    fn inbound_decodes_by_wire_tag() {
        let pong: InboundMessage =
            serde_json::from_value(json!({"id": 3, "type": "pong"})).unwrap();
        assert_eq!(pong, InboundMessage::Pong {});

        let result: InboundMessage = serde_json::from_value(
            json!({"id": 4, "type": "result", "success": true, "result": null}),
        )
        .unwrap();
        assert_eq!(result.type_tag(), "result");
    }

    #[test]
    fn outbound_frame_serializes_protocol_field_names() {
        let frame = OutboundFrame {
            id: 12,
            message: OutboundMessage::SubscribeEvents {
                event_type: "state_changed".into(),
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"id": 12, "type": "subscribe_events", "event_type": "state_changed"})
        );
    }

    #[test]
    fn auth_message_serializes_without_an_id() {
        let value = serde_json::to_value(OutboundMessage::Auth {
            access_token: "secret".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "secret"}));
    }
}
