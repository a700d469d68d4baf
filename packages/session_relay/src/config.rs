use anyhow::{Context, Result};
use relay_auth::BackendSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   relay.toml:      [auth]
//                    backend_socket_token = "..."
//
//   env var:         RELAY_AUTH__BACKEND_SOCKET_TOKEN=...   (double underscore = nesting)
//
//   (single underscore stays within field names: RELAY_SERVER__SEND_CHANNEL_CAPACITY)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub fanout: FanoutFileConfig,
}

/// Server tuning knobs (lives under `[server]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    #[serde(default = "default_room_channel_capacity")]
    pub room_channel_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            send_channel_capacity: default_send_channel_capacity(),
            room_channel_capacity: default_room_channel_capacity(),
        }
    }
}

/// Connection authorization tunables (lives under `[auth]` in relay.toml).
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// Shared secret the agent backend presents. Empty disables backend trust.
    #[serde(default)]
    pub backend_socket_token: String,
    #[serde(default = "default_backend_header")]
    pub backend_header: String,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            backend_socket_token: String::new(),
            backend_header: default_backend_header(),
            session_cookie: default_session_cookie(),
        }
    }
}

impl fmt::Debug for AuthFileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFileConfig")
            .field(
                "backend_socket_token",
                &if self.backend_socket_token.is_empty() {
                    "<unset>"
                } else {
                    "<redacted>"
                },
            )
            .field("backend_header", &self.backend_header)
            .field("session_cookie", &self.session_cookie)
            .finish()
    }
}

/// Fan-out backplane tunables (lives under `[fanout]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FanoutFileConfig {
    /// Redis URL shared by all relay processes. Unset = single-process mode.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_fanout_channel")]
    pub channel: String,
    #[serde(default = "default_stop_key_suffix")]
    pub stop_key_suffix: String,
}

impl Default for FanoutFileConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: default_fanout_channel(),
            stop_key_suffix: default_stop_key_suffix(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_send_channel_capacity() -> usize {
    100
}
fn default_room_channel_capacity() -> usize {
    256
}
fn default_backend_header() -> String {
    "x-agent-backend-socket-token".to_string()
}
fn default_session_cookie() -> String {
    "relay.sid".to_string()
}
fn default_fanout_channel() -> String {
    "relay:rooms".to_string()
}
fn default_stop_key_suffix() -> String {
    "_stop".to_string()
}

/// Build a figment that layers: defaults → relay.toml → RELAY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_SERVER__PORT=8080`  →  `server.port = 8080`
///   `RELAY_FANOUT__REDIS_URL=redis://cache:6379`  →  `fanout.redis_url = ...`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("relay.toml")))
        .merge(Env::prefixed("RELAY_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Connection authorization configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub backend_secret: BackendSecret,
    /// Header carrying the backend shared secret
    pub backend_header: String,
    /// Cookie carrying the user's session token
    pub session_cookie: String,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            backend_secret: BackendSecret::new(fc.backend_socket_token.as_bytes()),
            backend_header: fc.backend_header.to_ascii_lowercase(),
            session_cookie: fc.session_cookie.clone(),
        }
    }
}

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket-related settings
    pub websocket: WebSocketConfig,
}

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Channel capacity for frames queued to one client
    pub send_channel_capacity: usize,
    /// Broadcast channel capacity per room
    pub room_channel_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone(),
            port: fc.port,
            websocket: WebSocketConfig {
                send_channel_capacity: fc.send_channel_capacity.max(1),
                room_channel_capacity: fc.room_channel_capacity.max(1),
            },
        }
    }
}

/// Cross-process fan-out configuration (runtime view).
#[derive(Clone, Debug)]
pub struct FanoutConfig {
    pub redis_url: Option<String>,
    pub channel: String,
    pub stop_key_suffix: String,
}

impl FanoutConfig {
    pub fn from_file(fc: &FanoutFileConfig) -> Self {
        Self {
            redis_url: fc.redis_url.clone().filter(|url| !url.is_empty()),
            channel: fc.channel.clone(),
            stop_key_suffix: fc.stop_key_suffix.clone(),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl RelayConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".session-relay"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        let db_path = data_dir.join("relay.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            db_path,
            logs_dir,
        })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("relay.toml")
    }
}
