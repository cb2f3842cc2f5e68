//! Session lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a session is in its lifecycle.
///
/// `Deriving` covers derivation and upload, which run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Scanning,
    Copying,
    Deriving,
    Publishing,
    Done,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Error)
    }

    /// Forward-only lifecycle; `Error` is reachable from any live state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Scanning, Copying) | (Copying, Deriving) | (Deriving, Publishing) | (Publishing, Done) => {
                true
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Scanning => "scanning",
            SessionState::Copying => "copying",
            SessionState::Deriving => "deriving",
            SessionState::Publishing => "publishing",
            SessionState::Done => "done",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
