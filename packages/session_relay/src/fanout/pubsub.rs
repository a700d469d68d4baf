//! Redis pub/sub backplane.
//!
//! Every relay process publishes room frames to one channel and runs one
//! listener that feeds what it hears into its local [`RoomHub`], including
//! its own publications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::hub::RoomHub;
use crate::ws::protocol::OutboundFrame;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// What travels over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub room: String,
    pub frame: OutboundFrame,
}

pub async fn publish(
    conn: &MultiplexedConnection,
    channel: &str,
    envelope: &Envelope,
) -> Result<()> {
    let payload = serde_json::to_string(envelope)?;
    let mut conn = conn.clone();
    redis::cmd("PUBLISH")
        .arg(channel)
        .arg(payload)
        .query_async::<_, i64>(&mut conn)
        .await
        .with_context(|| format!("Failed to publish to {channel}"))?;
    Ok(())
}

/// Spawn the listener. It reconnects until `cancel` fires.
pub fn spawn_listener(
    client: redis::Client,
    channel: String,
    hub: Arc<RoomHub>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = listen(&client, &channel, &hub) => {
                    if let Err(e) = result {
                        error!("Fan-out listener failed: {:#}", e);
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        info!("Fan-out listener stopped");
    })
}

async fn listen(client: &redis::Client, channel: &str, hub: &RoomHub) -> Result<()> {
    let mut pubsub = client
        .get_async_connection()
        .await
        .context("Failed to open pub/sub connection")?
        .into_pubsub();
    pubsub
        .subscribe(channel)
        .await
        .with_context(|| format!("Failed to subscribe to {channel}"))?;
    info!(channel = %channel, "Fan-out listener subscribed");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!("Unreadable fan-out payload: {}", e);
                continue;
            }
        };
        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => {
                let delivered = hub.deliver(&envelope.room, Arc::new(envelope.frame)).await;
                debug!(room = %envelope.room, delivered, "Fan-out frame delivered");
            }
            Err(e) => warn!("Malformed fan-out envelope: {}", e),
        }
    }
    anyhow::bail!("pub/sub stream ended")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_format() {
        let envelope = Envelope {
            room: "_aaaaaaaaaaaaaaaaaaaaaaaa".into(),
            frame: OutboundFrame::relay("message", json!("hi")),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "room": "_aaaaaaaaaaaaaaaaaaaaaaaa",
                "frame": { "event": "message", "data": "hi" }
            })
        );
        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }
}
