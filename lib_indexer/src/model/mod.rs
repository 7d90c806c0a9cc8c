//! # Data Model
//!
//! The normalized message shape produced by every ingester, the bus event
//! envelopes, and the domain records decoded from upstream payloads. Field
//! names on the domain records mirror the external wire format exactly
//! (`entity_id`, `time_fired`, ...) for interoperability with the source
//! protocols.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a normalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Normal,
}

/// The single message shape every transport variant normalizes into.
///
/// `topic` is a free-form classification string; for decoded payloads it is
/// the payload's type name, for broker messages the broker topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub topic: String,
    pub payload: MessagePayload,
}

impl Message {
    /// Builds a `Normal` message whose topic is the payload's type name.
    pub fn normal(payload: MessagePayload) -> Self {
        Self {
            message_type: MessageType::Normal,
            topic: payload.type_name().to_string(),
            payload,
        }
    }

    /// Builds a `Normal` message with an explicit topic (broker messages).
    pub fn with_topic(topic: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            message_type: MessageType::Normal,
            topic: topic.into(),
            payload,
        }
    }
}

/// Closed set of payloads a `Message` can carry. Records the pipeline does
/// not decode further travel as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    EntityStateChange(EntityStateChange),
    Device(Device),
    Post(Post),
    Json(serde_json::Value),
}

impl MessagePayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessagePayload::EntityStateChange(_) => "EntityStateChange",
            MessagePayload::Device(_) => "Device",
            MessagePayload::Post(_) => "Post",
            MessagePayload::Json(_) => "Json",
        }
    }
}

/// Bus envelope for a message accepted by the ingester service.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub source: String,
    pub event_type: String,
    pub data: Message,
}

impl MessageEvent {
    pub fn message_in(source: impl Into<String>, data: Message) -> Self {
        Self {
            source: source.into(),
            event_type: "message.in".to_string(),
            data,
        }
    }
}

/// Bus envelope for service lifecycle markers (`service.start` / `service.stop`).
#[derive(Debug, Clone, PartialEq)]
pub struct SystemEvent {
    pub event_type: String,
    pub source: String,
}

impl SystemEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
        }
    }
}

/// A state-change event pushed by the WebSocket feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStateChange {
    pub event_type: String,
    pub data: EntityStateChangeData,
    pub origin: String,
    pub time_fired: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStateChangeData {
    pub old_state: EntityState,
    pub new_state: EntityState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    pub attributes: Option<EntityStateAttributes>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStateAttributes {
    pub state_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub device_class: Option<String>,
}

/// A device record returned by the polled REST registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub area_id: Option<String>,
    pub manufacturer: Option<String>,
    pub device_model: Option<String>,
    pub device_name: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// A post record returned by the polled REST endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}
