//! JSON text codec for relay envelopes.
//!
//! Inbound frames are decoded in two steps: first as generic JSON, then
//! against the known `event` names. That split lets the relay tell a client
//! *why* a frame was rejected (not JSON, no event, unknown event, bad data)
//! instead of surfacing a raw serde message.

use serde::Deserialize;
use serde_json::Value;

use crate::envelope::{ClientEvent, ServerEvent};

/// Reasons an inbound frame is rejected.
///
/// The `Display` text of each variant is what the relay puts in the
/// `error` envelope sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame is not valid JSON (or not valid UTF-8).
    #[error("Invalid JSON format")]
    InvalidJson,
    /// The frame is JSON but has no string `event` field.
    #[error("Missing event field")]
    MissingEvent,
    /// The `event` field names no known event.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    /// The `event` is known but its `data` has the wrong shape.
    #[error("Invalid data for event {event}: {detail}")]
    InvalidData {
        /// Event whose payload failed to decode.
        event: &'static str,
        /// Decoder message.
        detail: String,
    },
    /// The frame exceeds the relay's size limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Size of the rejected frame in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Error type for encoding outbound envelopes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Decodes a client text frame into a [`ClientEvent`].
///
/// # Errors
///
/// Returns the [`EnvelopeError`] describing why the frame is malformed.
pub fn decode_client(text: &str) -> Result<ClientEvent, EnvelopeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| EnvelopeError::InvalidJson)?;

    let event = match value.get("event") {
        Some(Value::String(name)) => match name.as_str() {
            ClientEvent::JOIN_ROOM => ClientEvent::JOIN_ROOM,
            ClientEvent::SEND_MESSAGE => ClientEvent::SEND_MESSAGE,
            other => return Err(EnvelopeError::UnknownEvent(other.to_string())),
        },
        _ => return Err(EnvelopeError::MissingEvent),
    };

    ClientEvent::deserialize(value).map_err(|e| EnvelopeError::InvalidData {
        event,
        detail: e.to_string(),
    })
}

/// Decodes a client binary frame, which must hold UTF-8 JSON text.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidJson`] for non-UTF-8 bytes, otherwise
/// whatever [`decode_client`] returns.
pub fn decode_client_bytes(bytes: &[u8]) -> Result<ClientEvent, EnvelopeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::InvalidJson)?;
    decode_client(text)
}

/// Encodes a [`ServerEvent`] as JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a server text frame. Used by clients and tests.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a server envelope.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ClientEvent`] as JSON text. Used by clients and tests.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}
