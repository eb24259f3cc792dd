//! Relay core: shared state, connection lifecycle, and room broadcast.
//!
//! Each WebSocket connection gets a bounded outbound queue drained by its own
//! writer task. Inbound frames are decoded into [`ClientEvent`]s: `join-room`
//! moves the connection into a room, `send-message` fans a
//! `receive-message` out to every connection in the target room. Fan-out uses
//! non-blocking `try_send`, so a stalled recipient never holds up the sender
//! or the rest of the room.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bazaar_proto::codec::{self, EnvelopeError};
use bazaar_proto::{ClientEvent, RoomId, SendMessage, ServerEvent};
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::registry::{ConnectionId, ConnectionRegistry};

/// Default maximum allowed frame size in bytes (64 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Default number of frames buffered per connection before deliveries drop.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Tunables for relay behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Frames larger than this many bytes are rejected.
    pub max_payload_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_size: usize,
    /// Whether the sender receives its own broadcast when it is in the room.
    pub echo_to_sender: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            echo_to_sender: true,
        }
    }
}

/// Why a frame could not be handed to a recipient's writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient is not draining its queue fast enough.
    #[error("outbound queue is full")]
    QueueFull,
    /// The recipient's writer task has gone away.
    #[error("connection is closed")]
    Closed,
}

/// Per-broadcast delivery accounting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients skipped because of a [`DeliveryError`].
    pub failed: usize,
}

/// What the relay did with one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The connection joined the room.
    Joined(RoomId),
    /// A message was fanned out to the room.
    Broadcast(BroadcastReport),
    /// The frame was malformed; an `error` envelope went back to the sender.
    Rejected(EnvelopeError),
    /// The connection is not registered, so the frame was ignored.
    Dropped,
}

/// A freshly registered connection: its id plus the receiving end of its
/// outbound queue, to be drained by the connection's writer task.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Registry id of the connection.
    pub id: ConnectionId,
    /// Frames queued for this connection.
    pub receiver: mpsc::Receiver<Message>,
}

/// Shared relay state: the connection registry plus relay settings.
pub struct RelayState {
    /// Live connections and their room assignments.
    pub registry: ConnectionRegistry,
    settings: RelaySettings,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay with an empty registry and default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(RelaySettings::default())
    }

    /// Creates a relay with an empty registry and custom settings.
    #[must_use]
    pub fn with_settings(settings: RelaySettings) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            settings,
        }
    }

    /// Returns the settings this relay runs with.
    #[must_use]
    pub const fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Registers a new connection with no room.
    pub fn connect(&self) -> ConnectionHandle {
        let (tx, receiver) = mpsc::channel(self.settings.outbound_queue_size.max(1));
        let id = self.registry.register(tx);
        tracing::info!(conn_id = %id, connections = self.registry.len(), "connection registered");
        ConnectionHandle { id, receiver }
    }

    /// Removes a connection. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.registry.unregister(id);
        if removed {
            tracing::info!(conn_id = %id, connections = self.registry.len(), "connection unregistered");
        } else {
            tracing::debug!(conn_id = %id, "connection already unregistered");
        }
        removed
    }

    /// Records a transport error on a connection.
    ///
    /// Registry state is left alone; the socket task runs the close path once
    /// the transport reports the channel as finished.
    pub fn report_error(&self, id: ConnectionId, cause: &dyn fmt::Display) {
        tracing::warn!(conn_id = %id, error = %cause, "connection error");
    }

    /// Handles a text frame from a connection.
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> Outcome {
        if let Err(e) = self.check_size(text.len()) {
            return self.reject(id, e);
        }
        match codec::decode_client(text) {
            Ok(event) => self.dispatch(id, event),
            Err(e) => self.reject(id, e),
        }
    }

    /// Handles a binary frame from a connection. The bytes must be UTF-8 JSON.
    pub fn handle_binary(&self, id: ConnectionId, data: &[u8]) -> Outcome {
        if let Err(e) = self.check_size(data.len()) {
            return self.reject(id, e);
        }
        match codec::decode_client_bytes(data) {
            Ok(event) => self.dispatch(id, event),
            Err(e) => self.reject(id, e),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), EnvelopeError> {
        let max = self.settings.max_payload_size;
        if size > max {
            return Err(EnvelopeError::PayloadTooLarge { size, max });
        }
        Ok(())
    }

    fn dispatch(&self, id: ConnectionId, event: ClientEvent) -> Outcome {
        match event {
            ClientEvent::JoinRoom(room) => self.join(id, room),
            ClientEvent::SendMessage(msg) => {
                if !self.registry.contains(id) {
                    tracing::error!(conn_id = %id, "send-message from unregistered connection");
                    return Outcome::Dropped;
                }
                Outcome::Broadcast(self.broadcast(id, msg))
            }
        }
    }

    fn join(&self, id: ConnectionId, room: RoomId) -> Outcome {
        match self.registry.join(id, room.clone()) {
            Ok(previous) => {
                tracing::debug!(
                    conn_id = %id,
                    room = %room,
                    previous = ?previous,
                    "connection joined room"
                );
                self.send_to(id, &ServerEvent::joined(room.clone()));
                Outcome::Joined(room)
            }
            Err(e) => {
                tracing::error!(error = %e, room = %room, "join ignored");
                Outcome::Dropped
            }
        }
    }

    /// Sends a `receive-message` to every connection in `msg.room_id`.
    ///
    /// The member list is read once; connections joining or leaving while
    /// the fan-out runs are not reconsidered. A delivery failure is logged
    /// and counted, and the loop moves on to the next recipient.
    pub fn broadcast(&self, origin: ConnectionId, msg: SendMessage) -> BroadcastReport {
        let SendMessage {
            room_id,
            message,
            sender,
        } = msg;

        if self.registry.room_of(origin).as_ref() != Some(&room_id) {
            // Sender identity and membership are not verified.
            tracing::debug!(conn_id = %origin, room = %room_id, "broadcast from outside the room");
        }

        let event = ServerEvent::ReceiveMessage {
            room_id: room_id.clone(),
            message,
            sender,
            timestamp: timestamp_now(),
        };
        let frame = match codec::encode_server(&event) {
            Ok(text) => Utf8Bytes::from(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode receive-message");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for member in self.registry.members(&room_id) {
            if member.id == origin && !self.settings.echo_to_sender {
                continue;
            }
            match deliver(&member.sender, Message::Text(frame.clone())) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(conn_id = %member.id, room = %room_id, error = %e, "dropping broadcast for recipient");
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            conn_id = %origin,
            room = %room_id,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    fn reject(&self, id: ConnectionId, error: EnvelopeError) -> Outcome {
        tracing::warn!(conn_id = %id, error = %error, "rejecting malformed frame");
        self.send_to(id, &ServerEvent::error(&error));
        Outcome::Rejected(error)
    }

    /// Queues an envelope for a single connection.
    fn send_to(&self, id: ConnectionId, event: &ServerEvent) {
        let Some(sender) = self.registry.sender_of(id) else {
            return;
        };
        match codec::encode_server(event) {
            Ok(text) => {
                if let Err(e) = deliver(&sender, Message::Text(text.into())) {
                    tracing::warn!(conn_id = %id, error = %e, "failed to queue reply");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode reply"),
        }
    }
}

fn deliver(sender: &mpsc::Sender<Message>, msg: Message) -> Result<(), DeliveryError> {
    sender.try_send(msg).map_err(|e| match e {
        TrySendError::Full(_) => DeliveryError::QueueFull,
        TrySendError::Closed(_) => DeliveryError::Closed,
    })
}

/// Current UTC time as RFC 3339 with millisecond precision.
fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drives one upgraded WebSocket connection until either side finishes.
///
/// The connection lifecycle:
/// 1. Register the connection with no room.
/// 2. Spawn a writer task draining the outbound queue into the socket.
/// 3. Read frames and hand them to the relay.
/// 4. When reading or writing stops, unregister the connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let ConnectionHandle { id, mut receiver } = state.connect();

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = receiver.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id = %id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    reader_state.handle_text(id, text.as_str());
                }
                Ok(Message::Binary(data)) => {
                    reader_state.handle_binary(id, &data);
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(conn_id = %id, "received close frame");
                    break;
                }
                Ok(_) => {
                    // Ping/pong is answered by the transport.
                }
                Err(e) => {
                    reader_state.report_error(id, &e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.disconnect(id);
}
