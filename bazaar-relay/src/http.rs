//! Read-only HTTP endpoints describing relay occupancy.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::registry::RoomSummary;
use crate::relay::RelayState;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is answering.
    pub status: &'static str,
    /// Registered connections.
    pub connections: usize,
    /// Rooms with at least one connection.
    pub rooms: usize,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.len(),
        rooms: state.registry.rooms().len(),
    })
}

/// `GET /rooms`: occupied rooms, largest first.
pub async fn rooms(State(state): State<Arc<RelayState>>) -> Json<Vec<RoomSummary>> {
    Json(state.registry.rooms())
}
