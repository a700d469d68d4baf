//! Process-local room registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use crate::ws::protocol::OutboundFrame;

pub type SharedFrame = Arc<OutboundFrame>;

/// One broadcast channel per room that has at least one local subscriber.
pub struct RoomHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<SharedFrame>>>,
    capacity: usize,
}

impl RoomHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<SharedFrame> {
        if let Some(tx) = self.rooms.read().await.get(room) {
            return tx.subscribe();
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver to local subscribers. Returns how many received it.
    pub async fn deliver(&self, room: &str, frame: SharedFrame) -> usize {
        match self.rooms.read().await.get(room) {
            Some(tx) => tx.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the room's channel once nobody listens.
    pub async fn prune(&self, room: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room).is_some_and(|tx| tx.receiver_count() == 0) {
            rooms.remove(room);
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
