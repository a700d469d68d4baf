//! Authorization failures and their error codes.

use serde::{Deserialize, Serialize};

use crate::capability::Capability;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no session cookie presented")]
    MissingSessionCookie,

    #[error("unknown session token")]
    UnknownToken,

    #[error("session token expired")]
    TokenExpired,

    #[error("account not found")]
    AccountNotFound,

    #[error("account has no current team")]
    NoCurrentTeam,

    #[error("capability {0:?} not granted")]
    MissingCapability(Capability),
}

impl AuthError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MissingSessionCookie => "missing_session_cookie",
            Self::UnknownToken => "unknown_token",
            Self::TokenExpired => "token_expired",
            Self::AccountNotFound => "account_not_found",
            Self::NoCurrentTeam => "no_current_team",
            Self::MissingCapability(_) => "missing_capability",
        }
    }
}

/// Log-friendly summary of why a connection ended up untrusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub error: String,
    pub message: String,
}

impl From<&AuthError> for AuthOutcome {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
