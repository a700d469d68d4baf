//! WebSocket Handler
//!
//! Transport loop for one relay connection.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::AppState;
use crate::auth::PeerIdentity;
use crate::fanout::SharedFrame;

use super::dispatch::{ConnectionContext, dispatch_client_event, log_outcome};
use super::protocol::ClientEvent;

/// Handle a relay WebSocket connection.
///
/// Events are dispatched one at a time in arrival order, so a peer's
/// streamed chunks reach the store in the order they were sent.
pub async fn handle_relay_ws(socket: WebSocket, state: AppState, identity: PeerIdentity) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(
        conn_id = %connection_id,
        trust = %identity.trust,
        "New relay connection (user: {})",
        identity.display_name().unwrap_or("anonymous")
    );

    let metrics = state.metrics.clone();
    metrics.connection_opened(identity.is_backend());

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for frames headed to this socket, fed by room forwarders and the dispatcher
    let (tx, mut rx) =
        mpsc::channel::<SharedFrame>(state.server_config.websocket.send_channel_capacity);

    let ctx = ConnectionContext::new(
        connection_id.clone(),
        identity,
        state.repository.clone(),
        state.fanout.clone(),
        state.stop_signal.clone(),
        tx,
    );
    debug!(conn_id = %connection_id, trusted = ctx.scope.is_trusted(), "Session scope attached");

    let metrics_sender = metrics.clone();
    let sender_task = async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(frame.as_ref()) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            metrics_sender.frame_sent();
        }
    };

    let input_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics.event_received();
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            let name = event.name();
                            let outcome = dispatch_client_event(&ctx, event).await;
                            log_outcome(&ctx, name, &outcome);
                            metrics.record_outcome(&outcome);
                        }
                        Err(e) => {
                            metrics.unparseable_frames.fetch_add(1, Ordering::Relaxed);
                            debug!(conn_id = %ctx.connection_id, "Unparseable frame: {}", e);
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(conn_id = %ctx.connection_id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => {}
        _ = input_task => {}
    }

    ctx.subscriptions.leave_all().await;
    metrics.connection_closed();
    info!(conn_id = %connection_id, "Relay connection closed");
}
