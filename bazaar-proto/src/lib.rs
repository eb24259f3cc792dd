//! Shared protocol definitions for the Bazaar room relay wire format.

pub mod codec;
pub mod envelope;

pub use envelope::{ClientEvent, RoomId, SendMessage, ServerEvent};
