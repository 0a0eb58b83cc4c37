use serde::Serialize;
use std::fmt;

/// Lifecycle of one interview session.
///
/// ```text
/// Created -> Connecting -> AwaitingParticipant -> Configuring -> Active -> Ended
///                 |                 |                  |
///                 +-----------------+------------------+------> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Connecting,
    AwaitingParticipant,
    Configuring,
    Active,
    Ended,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Connecting)
                | (Connecting, AwaitingParticipant)
                | (AwaitingParticipant, Configuring)
                | (Configuring, Active)
                | (Active, Ended)
                | (Connecting | AwaitingParticipant | Configuring, Failed)
        )
    }

    pub fn transition(self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingParticipant => "awaiting_participant",
            SessionState::Configuring => "configuring",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
