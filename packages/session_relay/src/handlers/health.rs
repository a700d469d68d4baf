use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let rooms = state.fanout.hub().room_count().await as u64;

    let status = if snapshot.errors.downstream == 0 {
        "healthy"
    } else {
        "degraded"
    };
    let fanout = if state.fanout.is_distributed() {
        "redis"
    } else {
        "local"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: snapshot.connections.active,
        rooms,
        fanout: fanout.to_string(),
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness check - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness check - returns 200 if the server is ready to accept requests
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = state.db.pool.acquire().await.is_ok();

    if db_ok {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response()
    }
}
