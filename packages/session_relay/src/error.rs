//! Outcomes of handling one inbound event.
//!
//! None of these are ever sent back to the peer. Authorization and scoping
//! failures are dropped quietly so a peer learns nothing about sessions it
//! cannot see; downstream failures are logged loudly.

use relay_auth::Capability;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid json in code message: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("session {0} not found in caller scope")]
    NotFound(String),

    #[error("unauthorized: {0:?} required")]
    Unauthorized(Capability),

    #[error("downstream failure: {0:#}")]
    Downstream(#[from] anyhow::Error),
}

impl RelayError {
    /// Silent outcomes are expected in normal operation and logged below `warn`.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::MalformedInput(_) | Self::NotFound(_) | Self::Unauthorized(_)
        )
    }

    /// Short label used as the metrics bucket.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::InvalidJson(_) => "invalid_json",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Downstream(_) => "downstream",
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
