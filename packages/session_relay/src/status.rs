//! Session status state machine.
//!
//! Chat events can arrive out of order, so the relay does not sequence them.
//! Instead every trigger maps to a target status and a status event is only
//! emitted when that target differs from the status loaded with the session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Idle, awaiting input.
    Waiting,
    /// The agent is producing output.
    Running,
    /// Ended; no further generation expected.
    Terminated,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "running" => Ok(Self::Running),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("unknown session status: {s}")),
        }
    }
}

/// Relay events that drive a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTrigger {
    /// Any inbound chat message. Feedback requests park the session.
    Message { is_feedback: bool },
    /// Hard stop from a user or the backend.
    Terminate,
    /// Stop request that also raises the cancellation flag.
    StopGenerating,
}

impl StatusTrigger {
    /// Terminations are written even when the loaded status already matches,
    /// since that status may be stale.
    pub fn forces_write(&self) -> bool {
        matches!(self, Self::Terminate | Self::StopGenerating)
    }
}

/// A computed transition, `from` being the status loaded with the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

impl StatusChange {
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }

    /// Whether the new status must be persisted.
    pub fn needs_write(&self, trigger: StatusTrigger) -> bool {
        self.is_change() || trigger.forces_write()
    }
}

impl SessionStatus {
    /// Target status for `trigger`.
    ///
    /// `Terminated` has no outbound edge of its own, but a later message still
    /// moves the session back to `Running`/`Waiting`.
    pub fn target(trigger: StatusTrigger) -> SessionStatus {
        match trigger {
            StatusTrigger::Message { is_feedback: true } => SessionStatus::Waiting,
            StatusTrigger::Message { is_feedback: false } => SessionStatus::Running,
            StatusTrigger::Terminate | StatusTrigger::StopGenerating => SessionStatus::Terminated,
        }
    }

    pub fn apply(self, trigger: StatusTrigger) -> StatusChange {
        StatusChange {
            from: self,
            to: Self::target(trigger),
        }
    }
}
