//! Operator subcommands that work directly against the data directory.

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use crate::config::{FanoutConfig, RelayConfig};
use crate::db::Database;
use crate::models::{Account, ROOM_ID_LEN, RoomId, Session};
use crate::repository::RelayRepository;
use crate::status::SessionStatus;
use crate::stop::StopSignal;

/// Token lifetime for seeded accounts: 30 days.
const SEED_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

pub struct SeedOptions {
    pub name: String,
    pub team: String,
    pub org: String,
    pub session_type: String,
}

/// Create an account, a login token for it, and one session in its team.
pub async fn seed_command(config: &RelayConfig, opts: SeedOptions) -> Result<()> {
    let db = Database::new(config).await?;
    let repository = RelayRepository::new(db.pool.clone());
    let now = chrono::Utc::now().timestamp();

    let account = Account {
        id: Uuid::new_v4().to_string(),
        name: opts.name.clone(),
        email: format!("{}@localhost", opts.name.to_lowercase().replace(' ', ".")),
        current_team: Some(opts.team.clone()),
        created_at: now,
    };
    repository.create_account(&account).await?;

    let token = Uuid::new_v4().simple().to_string();
    repository
        .create_auth_token(&token, &account.id, now + SEED_TOKEN_TTL_SECS)
        .await?;

    let session_id: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ROOM_ID_LEN)
        .collect();
    repository
        .create_session(&Session {
            id: session_id.clone(),
            org_id: opts.org,
            team_id: opts.team,
            kind: opts.session_type,
            status: SessionStatus::Waiting,
            tokens_used: 0,
            updated_at: now,
        })
        .await?;

    println!("account: {} ({})", account.id, account.name);
    println!("token:   {}", token);
    println!("session: {}", session_id);
    Ok(())
}

/// Inspect or clear a session's generation stop flag.
pub async fn stop_flag_command(fanout: &FanoutConfig, room: &str, clear: bool) -> Result<()> {
    let Some(room) = RoomId::parse(room) else {
        bail!("not a session id: {room}");
    };
    let Some(url) = fanout.redis_url.as_deref() else {
        bail!("stop flags are process-local without fanout.redis_url");
    };

    let client = redis::Client::open(url).context("Invalid redis_url")?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;
    let signal = StopSignal::redis(conn, fanout.stop_key_suffix.clone());

    let raised = if clear {
        signal.take(&room).await?
    } else {
        signal.is_requested(&room).await?
    };
    println!("{}: {}", signal.key(&room), if raised { "raised" } else { "clear" });
    Ok(())
}
