//! Accounts and the opaque session tokens carried in user cookies.
//!
//! Issuing tokens (login) happens upstream; the relay only looks them up.

use anyhow::{Context, Result};
use sqlx::FromRow;

use super::RelayRepository;
use crate::models::Account;

#[derive(Debug, Clone, FromRow)]
pub struct AuthToken {
    pub account_id: String,
    pub expires_at: i64,
}

impl RelayRepository {
    pub async fn create_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (id, name, email, current_team, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.current_team)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert account")?;
        Ok(())
    }

    pub async fn get_account_by_id(&self, id: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, name, email, current_team, created_at FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    pub async fn create_auth_token(
        &self,
        token: &str,
        account_id: &str,
        expires_at: i64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO auth_tokens (token, account_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(account_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("Failed to insert auth token")?;
        Ok(())
    }

    /// Look up a token without judging expiry; the caller decides.
    pub async fn get_auth_token(&self, token: &str) -> Result<Option<AuthToken>> {
        let row = sqlx::query_as::<_, AuthToken>(
            "SELECT account_id, expires_at FROM auth_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
