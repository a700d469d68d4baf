//! Room multiplexer.
//!
//! Frames are published to a room name (a session id or its shadow room).
//! Locally, each room is a broadcast channel in the [`RoomHub`]; each
//! connection runs one forwarding task per joined room that copies frames
//! into the connection's outbound queue. With a Redis backplane, publishing
//! goes through Redis so subscribers on every process receive the frame.

mod hub;
pub mod pubsub;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use hub::{RoomHub, SharedFrame};

use crate::metrics::ServerMetrics;
use crate::ws::protocol::OutboundFrame;

pub enum Backplane {
    /// Single process: deliver straight into the local hub.
    Local,
    /// Publish through Redis; the listener feeds the local hub.
    Redis {
        conn: MultiplexedConnection,
        channel: String,
    },
}

pub struct RoomMultiplexer {
    hub: Arc<RoomHub>,
    backplane: Backplane,
    metrics: Arc<ServerMetrics>,
}

impl RoomMultiplexer {
    pub fn new(hub: Arc<RoomHub>, backplane: Backplane, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            hub,
            backplane,
            metrics,
        }
    }

    pub fn local(room_capacity: usize, metrics: Arc<ServerMetrics>) -> Self {
        Self::new(Arc::new(RoomHub::new(room_capacity)), Backplane::Local, metrics)
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self.backplane, Backplane::Redis { .. })
    }

    pub async fn publish(&self, room: &str, frame: OutboundFrame) -> Result<()> {
        self.metrics.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        match &self.backplane {
            Backplane::Local => {
                let delivered = self.hub.deliver(room, Arc::new(frame)).await;
                debug!(room = %room, delivered, "Frame delivered");
            }
            Backplane::Redis { conn, channel } => {
                let envelope = pubsub::Envelope {
                    room: room.to_string(),
                    frame,
                };
                pubsub::publish(conn, channel, &envelope).await?;
            }
        }
        Ok(())
    }

    /// Subscription set for one connection, forwarding into `tx`.
    pub fn subscriptions(&self, tx: mpsc::Sender<SharedFrame>) -> RoomSubscriptions {
        RoomSubscriptions {
            hub: self.hub.clone(),
            tx,
            active: Mutex::new(HashMap::new()),
            metrics: self.metrics.clone(),
        }
    }
}

/// Rooms one connection has joined.
pub struct RoomSubscriptions {
    hub: Arc<RoomHub>,
    tx: mpsc::Sender<SharedFrame>,
    active: Mutex<HashMap<String, CancellationToken>>,
    metrics: Arc<ServerMetrics>,
}

impl RoomSubscriptions {
    /// Start forwarding `room`. Returns false if already joined.
    ///
    /// The hub subscription exists before this returns, so a frame published
    /// after `join` completes is never missed.
    pub async fn join(&self, room: &str) -> bool {
        let mut active = self.active.lock().await;
        if active.contains_key(room) {
            return false;
        }

        let cancel = CancellationToken::new();
        let rx = self.hub.subscribe(room).await;
        tokio::spawn(forward(
            room.to_string(),
            rx,
            self.tx.clone(),
            self.hub.clone(),
            self.metrics.clone(),
            cancel.clone(),
        ));
        active.insert(room.to_string(), cancel);
        true
    }

    /// Stop forwarding `room`. Returns false if it was not joined.
    pub async fn leave(&self, room: &str) -> bool {
        match self.active.lock().await.remove(room) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn leave_all(&self) {
        for (_, cancel) in self.active.lock().await.drain() {
            cancel.cancel();
        }
    }

    pub async fn is_joined(&self, room: &str) -> bool {
        self.active.lock().await.contains_key(room)
    }

    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }
}

async fn forward(
    room: String,
    mut rx: broadcast::Receiver<SharedFrame>,
    tx: mpsc::Sender<SharedFrame>,
    hub: Arc<RoomHub>,
    metrics: Arc<ServerMetrics>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    metrics.frames_dropped.fetch_add(n, Ordering::Relaxed);
                    warn!(room = %room, "Room subscriber lagged by {} frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    drop(rx);
    hub.prune(&room).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn mux() -> RoomMultiplexer {
        RoomMultiplexer::local(16, Arc::new(ServerMetrics::new()))
    }

    async fn recv(rx: &mut mpsc::Receiver<SharedFrame>) -> SharedFrame {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn joined_connection_receives_room_frames() {
        let mux = mux();
        let (tx, mut rx) = mpsc::channel(8);
        let subs = mux.subscriptions(tx);

        assert!(subs.join("room-1").await);
        assert!(!subs.join("room-1").await);

        mux.publish("room-1", OutboundFrame::tokens(3)).await.unwrap();
        assert_eq!(recv(&mut rx).await.data, json!(3));
    }

    #[tokio::test]
    async fn other_rooms_are_not_forwarded() {
        let mux = mux();
        let (tx, mut rx) = mpsc::channel(8);
        let subs = mux.subscriptions(tx);
        subs.join("room-1").await;

        mux.publish("room-2", OutboundFrame::tokens(1)).await.unwrap();
        mux.publish("room-1", OutboundFrame::tokens(2)).await.unwrap();
        assert_eq!(recv(&mut rx).await.data, json!(2));
    }

    #[tokio::test]
    async fn leave_stops_forwarding_and_prunes() {
        let mux = mux();
        let (tx, mut rx) = mpsc::channel(8);
        let subs = mux.subscriptions(tx);
        subs.join("room-1").await;
        assert_eq!(mux.hub().room_count().await, 1);

        assert!(subs.leave("room-1").await);
        assert!(!subs.leave("room-1").await);

        // The forwarder prunes asynchronously after cancellation
        for _ in 0..50 {
            if mux.hub().room_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mux.hub().room_count().await, 0);

        mux.publish("room-1", OutboundFrame::tokens(1)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_all_clears_every_room() {
        let mux = mux();
        let (tx, _rx) = mpsc::channel(8);
        let subs = mux.subscriptions(tx);
        subs.join("a").await;
        subs.join("b").await;
        assert_eq!(subs.len().await, 2);

        subs.leave_all().await;
        assert_eq!(subs.len().await, 0);
        assert!(!subs.is_joined("a").await);
    }

    #[tokio::test]
    async fn publish_counts_broadcasts() {
        let metrics = Arc::new(ServerMetrics::new());
        let mux = RoomMultiplexer::local(4, metrics.clone());
        mux.publish("r", OutboundFrame::terminate()).await.unwrap();
        assert_eq!(metrics.frames_broadcast.load(Ordering::Relaxed), 1);
        assert!(!mux.is_distributed());
    }
}
