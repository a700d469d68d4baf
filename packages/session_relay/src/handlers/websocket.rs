use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};

use crate::AppState;
use crate::auth;
use crate::ws;

/// Relay WebSocket endpoint.
///
/// The peer's trust level is fixed here, before the upgrade, from the
/// handshake headers. Unauthenticated peers still connect; they just cannot
/// join or relay into any session.
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = auth::authorize(&headers, &state.auth_config, &state.repository).await;
    ws.on_upgrade(move |socket| ws::handle_relay_ws(socket, state, identity))
}
