use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Lifecycle of a pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingPeerRoundOne,
    AwaitingPeerRoundTwo,
    KeyEstablished,
    AwaitingPayload,
    Done,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed | SessionState::Cancelled)
    }

    /// States in which the session has a poll armed or in flight.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingPeerRoundOne
                | SessionState::AwaitingPeerRoundTwo
                | SessionState::AwaitingPayload
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

/// Everything a session tells its observer, as a value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    SecretReady { code: String },
    KeyEstablished { key: Vec<u8> },
    PayloadReceived { payload: serde_json::Value },
    Failed { kind: ErrorKind, detail: String },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { state } => write!(f, "StateChanged({state})"),
            SessionEvent::SecretReady { .. } => write!(f, "SecretReady(<code>)"),
            SessionEvent::KeyEstablished { key } => write!(f, "KeyEstablished(<{} bytes>)", key.len()),
            SessionEvent::PayloadReceived { .. } => write!(f, "PayloadReceived"),
            SessionEvent::Failed { kind, detail } => write!(f, "Failed({kind}: {detail})"),
        }
    }
}
