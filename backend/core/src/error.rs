use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of a session failure, surfaced through
/// `SessionObserver::on_failed` and the failure reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Local misuse: bad configuration, bad code, bad party parameters.
    InvalidParameters,
    /// The peer sent something that does not decode or is out of order.
    MalformedMessage,
    /// Key confirmation failed. Covers both a mismatched code and a bad
    /// peer proof; the two are indistinguishable.
    KeyAgreementFailed,
    /// The relay rejected a request or kept failing until the attempt budget ran out.
    TransportError,
    /// The attempt budget or the session deadline was exhausted.
    Timeout,
}

impl ErrorKind {
    /// Numeric code sent to the failure reporter.
    pub fn report_code(self) -> i32 {
        match self {
            ErrorKind::InvalidParameters => 1,
            ErrorKind::MalformedMessage => 2,
            ErrorKind::KeyAgreementFailed => 3,
            ErrorKind::TransportError => 4,
            ErrorKind::Timeout => 5,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

/// Errors returned by a `ChannelTransport`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failure, timeout, or a 5xx answer. Worth retrying.
    #[error("network error: {0}")]
    Network(String),

    /// Nothing has been published on the channel yet.
    #[error("channel not found")]
    NotFound,

    /// The relay refused the request outright. Retrying will not help.
    #[error("relay rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A create-only write found the channel already taken.
    #[error("channel already in use")]
    Conflict,
}

impl TransportError {
    /// Whether the session should swallow this error and poll again.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::NotFound)
    }
}

/// Top-level error type for a pairing session.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("key agreement failed")]
    KeyAgreementFailed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl PairingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairingError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            PairingError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            PairingError::KeyAgreementFailed => ErrorKind::KeyAgreementFailed,
            PairingError::Transport(_) => ErrorKind::TransportError,
            PairingError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}
