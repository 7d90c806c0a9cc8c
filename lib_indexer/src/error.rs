//! Error types shared across the ingestion pipeline.

use thiserror::Error;

/// Errors raised while parsing, correlating or emitting inbound traffic.
///
/// None of these are fatal to the owning ingester: a malformed or unknown
/// frame is dropped and logged while the connection stays up.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("frame is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown message type [{type_tag}]: {source}")]
    UnknownMessageType {
        type_tag: String,
        #[source]
        source: serde_json::Error,
    },
}
