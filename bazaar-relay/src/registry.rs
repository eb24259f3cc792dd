//! Connection registry for the relay server.
//!
//! Tracks every live WebSocket connection together with the room it has
//! joined and the sender half of its outbound queue. Rooms are not stored:
//! a room is whatever set of connections currently carries the same
//! [`RoomId`], so [`ConnectionRegistry::members`] and
//! [`ConnectionRegistry::rooms`] are computed from the connection map.
//!
//! Entries are ephemeral and lost on relay restart.

use std::collections::HashMap;
use std::fmt;

use axum::extract::ws::Message;
use bazaar_proto::RoomId;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Server-assigned identity of one connection (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new time-ordered connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when the registry is asked about a connection it does not
/// hold. These indicate a lifecycle bug in the caller, never bad client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The connection is not (or no longer) registered.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug)]
struct ConnectionEntry {
    room: Option<RoomId>,
    sender: mpsc::Sender<Message>,
}

/// A connection that belonged to a room when the registry was read.
#[derive(Debug, Clone)]
pub struct RoomMember {
    /// The member's connection.
    pub id: ConnectionId,
    /// Sender half of the member's outbound queue.
    pub sender: mpsc::Sender<Message>,
}

/// Occupancy of one room, derived from the connection map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    /// The room.
    pub room_id: RoomId,
    /// Number of connections currently in it.
    pub members: usize,
}

/// In-memory map of live connections and their room assignments.
///
/// Thread-safe via [`RwLock`]. The lock is only held for the map access
/// itself; callers receive cloned senders and write to sockets after the
/// guard is released.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection with no room and returns its new id.
    pub fn register(&self, sender: mpsc::Sender<Message>) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections
            .write()
            .insert(id, ConnectionEntry { room: None, sender });
        id
    }

    /// Assigns `room` to the connection, replacing any previous room.
    ///
    /// Returns the room the connection was in before, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not registered.
    pub fn join(&self, id: ConnectionId, room: RoomId) -> Result<Option<RoomId>, RegistryError> {
        let mut conns = self.connections.write();
        let entry = conns
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        Ok(entry.room.replace(room))
    }

    /// Removes a connection from the registry.
    ///
    /// Returns `true` if the connection existed, `false` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.write().remove(&id).is_some()
    }

    /// Returns `true` if the connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Returns a clone of the connection's outbound sender, if registered.
    pub fn sender_of(&self, id: ConnectionId) -> Option<mpsc::Sender<Message>> {
        self.connections
            .read()
            .get(&id)
            .map(|entry| entry.sender.clone())
    }

    /// Returns the room the connection is currently in.
    pub fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.connections
            .read()
            .get(&id)
            .and_then(|entry| entry.room.clone())
    }

    /// Returns a snapshot of the connections currently in `room`.
    pub fn members(&self, room: &RoomId) -> Vec<RoomMember> {
        self.connections
            .read()
            .iter()
            .filter(|(_, entry)| entry.room.as_ref() == Some(room))
            .map(|(id, entry)| RoomMember {
                id: *id,
                sender: entry.sender.clone(),
            })
            .collect()
    }

    /// Groups connections by room, largest rooms first.
    ///
    /// Connections that have not joined a room are not counted.
    pub fn rooms(&self) -> Vec<RoomSummary> {
        let mut counts: HashMap<RoomId, usize> = HashMap::new();
        for entry in self.connections.read().values() {
            if let Some(room) = &entry.room {
                *counts.entry(room.clone()).or_default() += 1;
            }
        }

        let mut rooms: Vec<RoomSummary> = counts
            .into_iter()
            .map(|(room_id, members)| RoomSummary { room_id, members })
            .collect();
        rooms.sort_by(|a, b| {
            b.members
                .cmp(&a.members)
                .then_with(|| a.room_id.to_string().cmp(&b.room_id.to_string()))
        });
        rooms
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Queues a close frame for every registered connection.
    ///
    /// Each writer task forwards the frame and shuts its socket down, which
    /// in turn unregisters the connection. Returns how many close frames were
    /// queued.
    pub fn close_all(&self) -> usize {
        let conns = self.connections.read();
        let mut queued = 0;
        for (id, entry) in conns.iter() {
            tracing::info!(conn_id = %id, "sending close frame to connection");
            if entry.sender.try_send(Message::Close(None)).is_ok() {
                queued += 1;
            }
        }
        drop(conns);
        queued
    }
}
