//! Peer trust levels and the relay capabilities each one carries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::trust::BackendGrant;

/// What a connection is allowed to do, independent of which session it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Subscribe to a session room.
    JoinRoom,
    /// Subscribe to a session's shadow room (user-input echo).
    JoinShadowRoom,
    /// Send messages and lifecycle events into a session.
    Relay,
    /// Finalize a streamed message.
    CompleteMessage,
    /// Resolve sessions outside the caller's own team.
    CrossTeamAccess,
}

/// Trust level of a connected peer, fixed once the authorization pipeline finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Presented the backend shared secret.
    Backend(BackendGrant),
    /// Authenticated user account.
    User,
    /// Neither; every session-scoped operation is denied.
    Anonymous,
}

impl Trust {
    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            Trust::Backend(_) => true,
            Trust::User => matches!(capability, Capability::JoinRoom | Capability::Relay),
            Trust::Anonymous => false,
        }
    }

    pub fn backend_grant(&self) -> Option<BackendGrant> {
        match self {
            Trust::Backend(grant) => Some(*grant),
            _ => None,
        }
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, Trust::Backend(_))
    }
}

impl fmt::Display for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(_) => write!(f, "backend"),
            Self::User => write!(f, "user"),
            Self::Anonymous => write!(f, "anonymous"),
        }
    }
}
