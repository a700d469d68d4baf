use anyhow::{Context, Result, anyhow};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use super::RelayRepository;
use crate::models::Session;
use crate::status::SessionStatus;

const SESSION_COLUMNS: &str = "id, org_id, team_id, type, status, tokens_used, updated_at";

fn session_from_row(r: &SqliteRow) -> Result<Session> {
    let status: String = r.get("status");
    Ok(Session {
        id: r.get("id"),
        org_id: r.get("org_id"),
        team_id: r.get("team_id"),
        kind: r.get("type"),
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        tokens_used: r.get("tokens_used"),
        updated_at: r.get("updated_at"),
    })
}

impl RelayRepository {
    pub async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (id, org_id, team_id, type, status, tokens_used, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.org_id)
        .bind(&session.team_id)
        .bind(&session.kind)
        .bind(session.status.to_string())
        .bind(session.tokens_used)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert session")?;
        Ok(())
    }

    /// Look up a session by id regardless of team. Backend-only path.
    pub async fn get_session_unscoped(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    /// Look up a session by id, only if it belongs to `team_id`.
    pub async fn get_session_for_team(&self, team_id: &str, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ? AND team_id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    /// Returns whether a row was updated.
    pub async fn set_session_status_unscoped(&self, id: &str, status: SessionStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update session status")?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns whether a row was updated; sessions of other teams are untouched.
    pub async fn set_session_status_for_team(
        &self,
        team_id: &str,
        id: &str,
        status: SessionStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET status = ? WHERE id = ? AND team_id = ?")
            .bind(status.to_string())
            .bind(id)
            .bind(team_id)
            .execute(&self.pool)
            .await
            .context("Failed to update session status")?;
        Ok(result.rows_affected() > 0)
    }

    /// Record activity on a session.
    pub async fn touch_session(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to touch session")?;
        Ok(())
    }
}

/// Add `delta` to the session's token counter on `conn` and return the new total.
///
/// Callers run this inside the same transaction as the message update it
/// accounts for. Negative deltas are clamped to zero so the counter never
/// decreases.
pub(super) async fn add_session_tokens(
    conn: &mut SqliteConnection,
    id: &str,
    delta: i64,
) -> Result<Option<i64>> {
    let total: Option<i64> = sqlx::query_scalar(
        "UPDATE sessions SET tokens_used = tokens_used + ? WHERE id = ? RETURNING tokens_used",
    )
    .bind(delta.max(0))
    .bind(id)
    .fetch_optional(conn)
    .await
    .context("Failed to increment session tokens")?;
    Ok(total)
}
