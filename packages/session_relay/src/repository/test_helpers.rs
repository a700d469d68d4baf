use sqlx::sqlite::SqlitePoolOptions;

use crate::models::{Account, Session};
use crate::status::SessionStatus;

pub const ORG: &str = "org-1";
pub const TEAM_A: &str = "team-a";
pub const TEAM_B: &str = "team-b";

/// Create a fresh RelayRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::RelayRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    super::RelayRepository::new(pool)
}

pub async fn seed_account(
    repo: &super::RelayRepository,
    id: &str,
    name: &str,
    current_team: Option<&str>,
) -> Account {
    let account = Account {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{id}@example.com"),
        current_team: current_team.map(String::from),
        created_at: chrono::Utc::now().timestamp(),
    };
    repo.create_account(&account)
        .await
        .expect("Failed to seed account");
    account
}

pub async fn seed_session(
    repo: &super::RelayRepository,
    id: &str,
    team_id: &str,
    status: SessionStatus,
) -> Session {
    let session = Session {
        id: id.to_string(),
        org_id: ORG.to_string(),
        team_id: team_id.to_string(),
        kind: "task".to_string(),
        status,
        tokens_used: 0,
        updated_at: chrono::Utc::now().timestamp(),
    };
    repo.create_session(&session)
        .await
        .expect("Failed to seed session");
    session
}
