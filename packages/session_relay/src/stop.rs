//! Generation cancellation flags.
//!
//! The relay raises a flag per room; the generation worker polls it and
//! clears it when it stops. With Redis configured the flag is shared by every
//! relay process and every worker.

use std::collections::HashSet;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::RoomId;

pub enum FlagStore {
    /// Process-local; single-process deployments and tests.
    Memory(Mutex<HashSet<String>>),
    Redis(MultiplexedConnection),
}

pub struct StopSignal {
    store: FlagStore,
    suffix: String,
}

impl StopSignal {
    pub fn in_memory(suffix: impl Into<String>) -> Self {
        Self {
            store: FlagStore::Memory(Mutex::new(HashSet::new())),
            suffix: suffix.into(),
        }
    }

    pub fn redis(conn: MultiplexedConnection, suffix: impl Into<String>) -> Self {
        Self {
            store: FlagStore::Redis(conn),
            suffix: suffix.into(),
        }
    }

    /// Key under which the flag for `room` is stored, e.g. `<room>_stop`.
    pub fn key(&self, room: &RoomId) -> String {
        format!("{}{}", room, self.suffix)
    }

    /// Raise the flag.
    pub async fn request(&self, room: &RoomId) -> Result<()> {
        let key = self.key(room);
        debug!(key = %key, "Raising stop flag");
        match &self.store {
            FlagStore::Memory(flags) => {
                flags.lock().await.insert(key);
            }
            FlagStore::Redis(conn) => {
                let mut conn = conn.clone();
                redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .with_context(|| format!("Failed to set {key}"))?;
            }
        }
        Ok(())
    }

    /// Whether the flag is raised, without clearing it.
    pub async fn is_requested(&self, room: &RoomId) -> Result<bool> {
        let key = self.key(room);
        match &self.store {
            FlagStore::Memory(flags) => Ok(flags.lock().await.contains(&key)),
            FlagStore::Redis(conn) => {
                let mut conn = conn.clone();
                let exists: i64 = redis::cmd("EXISTS")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("Failed to read {key}"))?;
                Ok(exists > 0)
            }
        }
    }

    /// Read and clear the flag in one step. Returns whether it was raised.
    pub async fn take(&self, room: &RoomId) -> Result<bool> {
        let key = self.key(room);
        match &self.store {
            FlagStore::Memory(flags) => Ok(flags.lock().await.remove(&key)),
            FlagStore::Redis(conn) => {
                let mut conn = conn.clone();
                let previous: Option<String> = redis::cmd("GETDEL")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("Failed to clear {key}"))?;
                Ok(previous.is_some())
            }
        }
    }
}
