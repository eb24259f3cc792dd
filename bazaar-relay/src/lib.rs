//! Bazaar room relay library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, tracks which room each one has joined,
//! and broadcasts chat messages to every connection in the same room.

pub mod config;
pub mod http;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod server;
