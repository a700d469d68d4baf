use std::sync::Arc;

use crate::AppState;
use crate::config::{
    AuthConfig, AuthFileConfig, FanoutConfig, FanoutFileConfig, ServerConfig, ServerFileConfig,
};
use crate::db::Database;
use crate::fanout::RoomMultiplexer;
use crate::metrics::ServerMetrics;
use crate::repository::RelayRepository;
use crate::stop::StopSignal;

pub const BACKEND_HEADER: &str = "x-agent-backend-socket-token";
pub const BACKEND_SECRET: &str = "test-backend-secret";

/// Build a fully-wired `AppState` backed by an in-memory SQLite database,
/// a process-local room hub and in-memory stop flags.
///
/// The backend secret is [`BACKEND_SECRET`].
pub async fn test_app_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    let server_config = ServerConfig::from_file(&ServerFileConfig::default());
    let fanout_config = FanoutConfig::from_file(&FanoutFileConfig::default());
    let auth_config = AuthConfig::from_file(&AuthFileConfig {
        backend_socket_token: BACKEND_SECRET.to_string(),
        ..Default::default()
    });
    let metrics = Arc::new(ServerMetrics::new());

    AppState {
        fanout: Arc::new(RoomMultiplexer::local(
            server_config.websocket.room_channel_capacity,
            metrics.clone(),
        )),
        stop_signal: Arc::new(StopSignal::in_memory(fanout_config.stop_key_suffix.clone())),
        server_config: Arc::new(server_config),
        auth_config: Arc::new(auth_config),
        metrics,
        db: Arc::new(Database { pool: pool.clone() }),
        repository: Arc::new(RelayRepository::new(pool)),
    }
}
