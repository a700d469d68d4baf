//! Connection authorization.
//!
//! Runs once per WebSocket upgrade, over the request headers, as an ordered
//! pipeline:
//!
//! 1. backend trust (shared-secret header, constant-time)
//! 2. session cookie decode
//! 3. token verification (existence and expiry)
//! 4. account hydration
//! 5. final gate (the account must belong to a team)
//!
//! A stage that fails halts the pipeline and leaves the peer anonymous. The
//! transport is never closed here; every event is authorized again when it
//! is dispatched.

use std::ops::ControlFlow;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use relay_auth::{AuthError, BackendGrant, Trust, classify};
use relay_auth::error::AuthOutcome;
use tracing::{debug, error};

use crate::config::AuthConfig;
use crate::models::Account;
use crate::repository::{AuthToken, RelayRepository};

/// Who is on the other end of a connection. Immutable once built.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub trust: Trust,
    /// Present only for authenticated user connections.
    pub account: Option<Account>,
}

impl PeerIdentity {
    pub fn backend(grant: BackendGrant) -> Self {
        Self {
            trust: Trust::Backend(grant),
            account: None,
        }
    }

    pub fn user(account: Account) -> Self {
        Self {
            trust: Trust::User,
            account: Some(account),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            trust: Trust::Anonymous,
            account: None,
        }
    }

    pub fn is_backend(&self) -> bool {
        self.trust.is_backend()
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.id.as_str())
    }

    pub fn team_id(&self) -> Option<&str> {
        self.account.as_ref().and_then(|a| a.current_team.as_deref())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.name.as_str())
    }
}

type Stage<T> = ControlFlow<PeerIdentity, T>;

/// Run the authorization pipeline against upgrade request headers.
pub async fn authorize(
    headers: &HeaderMap,
    config: &AuthConfig,
    repository: &RelayRepository,
) -> PeerIdentity {
    match run_pipeline(headers, config, repository).await {
        ControlFlow::Break(identity) | ControlFlow::Continue(identity) => identity,
    }
}

async fn run_pipeline(
    headers: &HeaderMap,
    config: &AuthConfig,
    repository: &RelayRepository,
) -> Stage<PeerIdentity> {
    backend_trust(headers, config)?;
    let token = session_cookie(headers, config)?;
    let auth_token = verify_token(repository, &token, chrono::Utc::now().timestamp()).await?;
    let account = hydrate_account(repository, &auth_token).await?;
    final_gate(account)
}

fn halt<T>(reason: AuthError) -> Stage<T> {
    let outcome = AuthOutcome::from(&reason);
    debug!(reason = %outcome.error, "{}", outcome.message);
    ControlFlow::Break(PeerIdentity::anonymous())
}

fn backend_trust(headers: &HeaderMap, config: &AuthConfig) -> Stage<()> {
    let presented = headers
        .get(config.backend_header.as_str())
        .map(|v| v.as_bytes());
    match classify(presented, &config.backend_secret) {
        Some(grant) => ControlFlow::Break(PeerIdentity::backend(grant)),
        None => ControlFlow::Continue(()),
    }
}

fn session_cookie(headers: &HeaderMap, config: &AuthConfig) -> Stage<String> {
    let jar = CookieJar::from_headers(headers);
    match jar.get(&config.session_cookie) {
        Some(cookie) if !cookie.value().is_empty() => {
            ControlFlow::Continue(cookie.value().to_string())
        }
        _ => halt(AuthError::MissingSessionCookie),
    }
}

async fn verify_token(repository: &RelayRepository, token: &str, now: i64) -> Stage<AuthToken> {
    match repository.get_auth_token(token).await {
        Ok(Some(auth_token)) if auth_token.expires_at > now => ControlFlow::Continue(auth_token),
        Ok(Some(_)) => halt(AuthError::TokenExpired),
        Ok(None) => halt(AuthError::UnknownToken),
        Err(e) => {
            error!("Token lookup failed: {:#}", e);
            halt(AuthError::UnknownToken)
        }
    }
}

async fn hydrate_account(repository: &RelayRepository, auth_token: &AuthToken) -> Stage<Account> {
    match repository.get_account_by_id(&auth_token.account_id).await {
        Ok(Some(account)) => ControlFlow::Continue(account),
        Ok(None) => halt(AuthError::AccountNotFound),
        Err(e) => {
            error!("Account lookup failed: {:#}", e);
            halt(AuthError::AccountNotFound)
        }
    }
}

fn final_gate(account: Account) -> Stage<PeerIdentity> {
    if account.current_team.is_none() {
        return halt(AuthError::NoCurrentTeam);
    }
    ControlFlow::Continue(PeerIdentity::user(account))
}
