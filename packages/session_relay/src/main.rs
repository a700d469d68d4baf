use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod access;
mod auth;
mod chunks;
mod cli;
mod config;
mod db;
mod error;
mod fanout;
mod handlers;
mod metrics;
mod models;
mod repository;
mod status;
mod stop;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::config::{
    AuthConfig, FanoutConfig, FileConfig, RelayConfig, ServerConfig, load_config,
};
use crate::db::Database;
use crate::fanout::{Backplane, RoomHub, RoomMultiplexer, pubsub};
use crate::metrics::ServerMetrics;
use crate::repository::RelayRepository;
use crate::stop::StopSignal;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Session messaging and status relay for agent workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.session-relay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Serve(ServeArgs),

    /// Create an account, a login token and a session for local testing
    Seed(SeedArgs),

    /// Inspect or clear a session's generation stop flag
    StopFlag(StopFlagArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Port to listen on (overrides relay.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind to (overrides relay.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Parser)]
struct SeedArgs {
    /// Display name for the account
    #[arg(long, default_value = "Operator")]
    name: String,

    #[arg(long, default_value = "team-1")]
    team: String,

    #[arg(long, default_value = "org-1")]
    org: String,

    #[arg(long = "type", default_value = "task")]
    session_type: String,
}

#[derive(Parser)]
struct StopFlagArgs {
    /// Session id
    room: String,

    /// Clear the flag after reading it
    #[arg(long)]
    clear: bool,
}

/// Shared application state
#[derive(Clone)]
pub(crate) struct AppState {
    /// Server runtime configuration
    pub server_config: Arc<ServerConfig>,
    /// Connection authorization configuration
    pub auth_config: Arc<AuthConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<RelayRepository>,
    pub fanout: Arc<RoomMultiplexer>,
    pub stop_signal: Arc<StopSignal>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RelayConfig::new(cli.data_dir.clone())?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .context("Failed to load relay configuration")?;

    match cli.command {
        Commands::Serve(args) => run_server(args, config, file_config).await,
        Commands::Seed(args) => {
            cli::seed_command(
                &config,
                cli::SeedOptions {
                    name: args.name,
                    team: args.team,
                    org: args.org,
                    session_type: args.session_type,
                },
            )
            .await
        }
        Commands::StopFlag(args) => {
            let fanout = FanoutConfig::from_file(&file_config.fanout);
            cli::stop_flag_command(&fanout, &args.room, args.clear).await
        }
    }
}

/// Pick the fan-out backplane and stop-flag store.
///
/// Without a Redis URL both stay in this process.
async fn build_fanout(
    fanout_config: &FanoutConfig,
    room_capacity: usize,
    metrics: Arc<ServerMetrics>,
    cancel: &CancellationToken,
) -> Result<(Arc<RoomMultiplexer>, Arc<StopSignal>)> {
    let hub = Arc::new(RoomHub::new(room_capacity));

    let Some(url) = fanout_config.redis_url.as_deref() else {
        info!("Fan-out: single process (set fanout.redis_url to share rooms across processes)");
        return Ok((
            Arc::new(RoomMultiplexer::new(hub, Backplane::Local, metrics)),
            Arc::new(StopSignal::in_memory(fanout_config.stop_key_suffix.clone())),
        ));
    };

    let client = redis::Client::open(url).context("Invalid fanout.redis_url")?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;
    pubsub::spawn_listener(
        client,
        fanout_config.channel.clone(),
        hub.clone(),
        cancel.clone(),
    );
    info!(channel = %fanout_config.channel, "Fan-out: Redis backplane");

    let backplane = Backplane::Redis {
        conn: conn.clone(),
        channel: fanout_config.channel.clone(),
    };
    Ok((
        Arc::new(RoomMultiplexer::new(hub, backplane, metrics)),
        Arc::new(StopSignal::redis(conn, fanout_config.stop_key_suffix.clone())),
    ))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/socket", get(handlers::websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/stats", get(handlers::get_database_stats))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, config: RelayConfig, file_config: FileConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "relay=debug,relay_auth=debug,tower_http=debug,info"
    } else {
        "relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting session relay");

    let mut server_file_config = file_config.server.clone();
    if let Some(port) = args.port {
        server_file_config.port = port;
    }
    if let Some(host) = args.host {
        server_file_config.host = host;
    }
    let server_config = Arc::new(ServerConfig::from_file(&server_file_config));
    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    let fanout_config = FanoutConfig::from_file(&file_config.fanout);

    if auth_config.backend_secret.is_disabled() {
        info!("Backend trust disabled (set auth.backend_socket_token to enable)");
    } else {
        info!(header = %auth_config.backend_header, "Backend trust enabled");
    }

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(RelayRepository::new(db.pool.clone()));

    let metrics = Arc::new(ServerMetrics::new());
    let shutdown = CancellationToken::new();
    let (fanout, stop_signal) = build_fanout(
        &fanout_config,
        server_config.websocket.room_channel_capacity,
        metrics.clone(),
        &shutdown,
    )
    .await?;

    let app_state = AppState {
        server_config: server_config.clone(),
        auth_config,
        metrics,
        db,
        repository,
        fanout,
        stop_signal,
    };
    let app = build_router(app_state);

    let addr = format!("{}:{}", server_config.host, server_config.port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Session relay listening on http://{}", actual_addr);
    info!("  GET    /socket        - Relay WebSocket");
    info!("  GET    /health        - Health summary");
    info!("  GET    /metrics       - Metrics snapshot");

    // Create shutdown signal handler
    let shutdown_for_signal = shutdown.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received shutdown signal, cleaning up...");
        shutdown_for_signal.cancel();
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    shutdown.cancel();
    info!("Shutdown complete");
    server_result
}
