//! Server metrics for observability
//!
//! Provides runtime metrics for monitoring relay health and throughput.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::RelayError;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Connections classified as the agent backend
    pub backend_connections: AtomicU64,

    // Event metrics
    /// Frames received from peers
    pub events_received: AtomicU64,
    /// Events handled without error
    pub events_handled: AtomicU64,
    /// Inbound frames that did not parse
    pub unparseable_frames: AtomicU64,

    // Frame metrics
    /// Frames published to rooms
    pub frames_broadcast: AtomicU64,
    /// Frames written to peers
    pub frames_sent: AtomicU64,
    /// Frames lost to slow subscribers
    pub frames_dropped: AtomicU64,

    // Dropped events by reason
    pub dropped_malformed: AtomicU64,
    pub dropped_invalid_json: AtomicU64,
    pub dropped_not_found: AtomicU64,
    pub dropped_unauthorized: AtomicU64,

    // Error metrics
    /// Data-layer or fan-out failures
    pub downstream_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self, is_backend: bool) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        if is_backend {
            self.backend_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the result of dispatching one event.
    pub fn record_outcome(&self, outcome: &Result<(), RelayError>) {
        let counter = match outcome {
            Ok(()) => &self.events_handled,
            Err(RelayError::MalformedInput(_)) => &self.dropped_malformed,
            Err(RelayError::InvalidJson(_)) => &self.dropped_invalid_json,
            Err(RelayError::NotFound(_)) => &self.dropped_not_found,
            Err(RelayError::Unauthorized(_)) => &self.dropped_unauthorized,
            Err(RelayError::Downstream(_)) => &self.downstream_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                backend: self.backend_connections.load(Ordering::Relaxed),
            },
            events: EventMetrics {
                received: self.events_received.load(Ordering::Relaxed),
                handled: self.events_handled.load(Ordering::Relaxed),
                unparseable: self.unparseable_frames.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                broadcast: self.frames_broadcast.load(Ordering::Relaxed),
                sent: self.frames_sent.load(Ordering::Relaxed),
                dropped: self.frames_dropped.load(Ordering::Relaxed),
            },
            dropped: DroppedEvents {
                malformed_input: self.dropped_malformed.load(Ordering::Relaxed),
                invalid_json: self.dropped_invalid_json.load(Ordering::Relaxed),
                not_found: self.dropped_not_found.load(Ordering::Relaxed),
                unauthorized: self.dropped_unauthorized.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                downstream: self.downstream_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub events: EventMetrics,
    pub frames: FrameMetrics,
    pub dropped: DroppedEvents,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub backend: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetrics {
    pub received: u64,
    pub handled: u64,
    pub unparseable: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub broadcast: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedEvents {
    pub malformed_input: u64,
    pub invalid_json: u64,
    pub not_found: u64,
    pub unauthorized: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub downstream: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub rooms: u64,
    pub fanout: String,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_auth::Capability;

    #[test]
    fn test_connection_tracking() {
        let metrics = ServerMetrics::new();

        metrics.connection_opened(false);
        metrics.connection_opened(true);
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.backend_connections.load(Ordering::Relaxed), 1);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_outcomes_bucketed_by_reason() {
        let metrics = ServerMetrics::new();
        metrics.record_outcome(&Ok(()));
        metrics.record_outcome(&Err(RelayError::NotFound("x".into())));
        metrics.record_outcome(&Err(RelayError::NotFound("y".into())));
        metrics.record_outcome(&Err(RelayError::Unauthorized(
            Capability::CompleteMessage,
        )));
        metrics.record_outcome(&Err(RelayError::Downstream(anyhow::anyhow!("boom"))));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events.handled, 1);
        assert_eq!(snapshot.dropped.not_found, 2);
        assert_eq!(snapshot.dropped.unauthorized, 1);
        assert_eq!(snapshot.errors.downstream, 1);
        assert_eq!(snapshot.dropped.malformed_input, 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened(false);
        metrics.event_received();
        metrics.frame_sent();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.events.received, 1);
        assert_eq!(snapshot.frames.sent, 1);
    }
}
