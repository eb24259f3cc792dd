//! Envelope types exchanged between relay clients and the relay server.
//!
//! Every frame is a JSON object with an `event` discriminator. Client frames
//! carry their payload under `data` (`{"event": "join-room", "data": "room1"}`);
//! server frames inline their fields next to `event`
//! (`{"event": "joined", "room": "room1", "message": "..."}`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque room identifier.
///
/// Clients may use either a JSON string or a JSON number. The value is kept
/// exactly as received, so `1` and `"1"` name two different rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomId {
    /// A textual room identifier.
    Text(String),
    /// A numeric room identifier.
    Number(serde_json::Number),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for RoomId {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for RoomId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// Payload of a `send-message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Room whose members receive the message.
    pub room_id: RoomId,
    /// Message body, forwarded to recipients verbatim.
    pub message: Value,
    /// Identifier the sender claims for itself. Not verified by the relay.
    pub sender: String,
}

/// Events sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Move this connection into the given room, leaving any previous one.
    JoinRoom(RoomId),
    /// Broadcast a message to every connection in a room.
    SendMessage(SendMessage),
}

impl ClientEvent {
    /// Wire name of [`ClientEvent::JoinRoom`].
    pub const JOIN_ROOM: &'static str = "join-room";
    /// Wire name of [`ClientEvent::SendMessage`].
    pub const SEND_MESSAGE: &'static str = "send-message";

    /// Returns the `event` discriminator this variant is encoded with.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => Self::JOIN_ROOM,
            Self::SendMessage(_) => Self::SEND_MESSAGE,
        }
    }
}

/// Events sent by the relay to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledges a `join-room` to the connection that sent it.
    Joined {
        /// The room that was joined.
        room: RoomId,
        /// Human-readable confirmation.
        message: String,
    },

    /// A message broadcast to a room member.
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        /// Room the message was sent to.
        room_id: RoomId,
        /// Message body as sent.
        message: Value,
        /// Sender identifier as claimed by the sending client.
        sender: String,
        /// Server time of the broadcast, RFC 3339 in UTC.
        timestamp: String,
    },

    /// Reports a rejected inbound frame to the connection that sent it.
    Error {
        /// Description of what was wrong with the frame.
        error: String,
    },
}

impl ServerEvent {
    /// Builds the acknowledgement for a successful `join-room`.
    #[must_use]
    pub fn joined(room: RoomId) -> Self {
        let message = format!("Joined room {room}");
        Self::Joined { room, message }
    }

    /// Builds an `error` envelope from anything displayable.
    pub fn error(reason: impl fmt::Display) -> Self {
        Self::Error {
            error: reason.to_string(),
        }
    }
}
