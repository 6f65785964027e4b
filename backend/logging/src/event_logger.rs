//! Session Event Logger
//!
//! Turns session observer callbacks into structured log lines, optionally
//! passing each one on to another observer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use codepair_core::{ErrorKind, SessionObserver, SessionState};

use crate::redact::redact_sensitive_data;

/// What gets logged for each callback. Never carries the code or the key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairingLogEvent {
    StateChanged { state: SessionState },
    SecretReady,
    KeyEstablished { key_len: usize },
    PayloadReceived { payload_bytes: usize },
    Failed { kind: ErrorKind, detail: String },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: PairingLogEvent,
}

impl EventLogEntry {
    pub fn new(session_id: &str, event: PairingLogEvent) -> Self {
        Self { session_id: session_id.to_string(), timestamp: Utc::now(), event }
    }
}

/// Logs every session callback under `session_id`, then forwards it to
/// the wrapped observer.
pub struct SessionEventLogger<O = ()> {
    session_id: String,
    inner: O,
}

impl SessionEventLogger<()> {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), inner: () }
    }
}

impl<O> SessionEventLogger<O> {
    pub fn wrapping<P: SessionObserver>(self, inner: P) -> SessionEventLogger<P> {
        SessionEventLogger { session_id: self.session_id, inner }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn log(&self, event: PairingLogEvent) {
        let failed = matches!(event, PairingLogEvent::Failed { .. });
        let entry = EventLogEntry::new(&self.session_id, event);
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| format!("{entry:?}"));
        if failed {
            warn!(target: "pairing_events", event = %line, "Pairing event");
        } else {
            info!(target: "pairing_events", event = %line, "Pairing event");
        }
    }
}

impl<O: SessionObserver> SessionObserver for SessionEventLogger<O> {
    fn on_state_changed(&mut self, state: SessionState) {
        self.log(PairingLogEvent::StateChanged { state });
        self.inner.on_state_changed(state);
    }

    fn on_secret_ready(&mut self, code: &str) {
        self.log(PairingLogEvent::SecretReady);
        self.inner.on_secret_ready(code);
    }

    fn on_key_established(&mut self, key: &[u8]) {
        self.log(PairingLogEvent::KeyEstablished { key_len: key.len() });
        self.inner.on_key_established(key);
    }

    fn on_payload_received(&mut self, payload: &serde_json::Value) {
        let payload_bytes = payload.to_string().len();
        self.log(PairingLogEvent::PayloadReceived { payload_bytes });
        self.inner.on_payload_received(payload);
    }

    fn on_failed(&mut self, kind: ErrorKind, detail: &str) {
        self.log(PairingLogEvent::Failed { kind, detail: redact_sensitive_data(detail) });
        self.inner.on_failed(kind, detail);
    }
}
