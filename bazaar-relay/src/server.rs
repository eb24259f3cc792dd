//! Router construction and server startup.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::http;
use crate::relay::{self, RelayState};

/// Result of a successful start: the bound address and the server task.
pub type ServerHandle = (std::net::SocketAddr, tokio::task::JoinHandle<()>);

/// Builds the relay router: `/ws` for chat, `/health` and `/rooms` for
/// introspection.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health))
        .route("/rooms", get(http::rooms))
        .with_state(state)
}

/// Starts the relay server on the given address with default settings.
///
/// Binding `127.0.0.1:0` picks a free port; the bound address is returned.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_shutdown(addr, state, std::future::pending::<()>()).await
}

/// Starts the relay server and stops accepting connections once `shutdown`
/// resolves. Open connections are asked to close first.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown<F>(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let graceful = async move {
            shutdown.await;
            let closed = state.registry.close_all();
            tracing::info!(connections = closed, "shutting down relay server");
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay::handle_socket(socket, state))
}
