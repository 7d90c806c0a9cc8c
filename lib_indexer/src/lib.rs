//! # lib_indexer
//!
//! Core library for the iot-indexer service. It adapts three external
//! transports (an authenticated WebSocket feed, a polled REST endpoint and an
//! MQTT broker) into one uniform `Message` stream, correlates asynchronous
//! WebSocket responses with the requests that caused them, routes decoded
//! inbound frames through type-keyed processors, and fans accepted messages
//! out over an in-process event bus to the document indexers.

pub mod configs;
pub mod core;
pub mod error;
pub mod indexer;
pub mod ingesters;
pub mod loggers;
pub mod model;
pub mod service;

pub use error::IngestError;
pub use model::{Message, MessageEvent, MessagePayload, MessageType, SystemEvent};
pub use service::Service;
