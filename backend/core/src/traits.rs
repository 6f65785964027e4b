use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ErrorKind, TransportError};
use crate::event::{SessionEvent, SessionState};
use crate::types::{ChannelId, ClientId, EntityTag, Fetched};

/// Blob store keyed by channel id, with optimistic versioning.
///
/// The relay is untrusted: implementations only move bytes around and never
/// look inside them. One transport may be shared by many sessions, so state
/// for one channel must never leak into another.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Overwrite the channel blob and return its new version token.
    async fn put(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
    ) -> Result<EntityTag, TransportError>;

    /// Write the first blob on a channel. Fails with
    /// `TransportError::Conflict`, leaving the channel untouched, when it
    /// already holds one.
    async fn create(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
    ) -> Result<EntityTag, TransportError>;

    /// Fetch the channel blob, answering `Fetched::Unchanged` when its token
    /// still equals `known`.
    async fn get(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        known: Option<&EntityTag>,
    ) -> Result<Fetched, TransportError>;
}

/// Receives session lifecycle callbacks. All methods default to no-ops.
pub trait SessionObserver: Send + 'static {
    fn on_state_changed(&mut self, _state: SessionState) {}

    /// Called once on the initiator, right after the session starts waiting
    /// for the peer, with the code to show to the user.
    fn on_secret_ready(&mut self, _code: &str) {}

    fn on_key_established(&mut self, _key: &[u8]) {}

    fn on_payload_received(&mut self, _payload: &serde_json::Value) {}

    fn on_failed(&mut self, _kind: ErrorKind, _detail: &str) {}
}

/// Ignores every callback.
impl SessionObserver for () {}

/// Forwards every callback as a `SessionEvent` over a channel.
impl SessionObserver for mpsc::UnboundedSender<SessionEvent> {
    fn on_state_changed(&mut self, state: SessionState) {
        let _ = self.send(SessionEvent::StateChanged { state });
    }

    fn on_secret_ready(&mut self, code: &str) {
        let _ = self.send(SessionEvent::SecretReady { code: code.to_string() });
    }

    fn on_key_established(&mut self, key: &[u8]) {
        let _ = self.send(SessionEvent::KeyEstablished { key: key.to_vec() });
    }

    fn on_payload_received(&mut self, payload: &serde_json::Value) {
        let _ = self.send(SessionEvent::PayloadReceived { payload: payload.clone() });
    }

    fn on_failed(&mut self, kind: ErrorKind, detail: &str) {
        let _ = self.send(SessionEvent::Failed { kind, detail: detail.to_string() });
    }
}

/// Sink for `(code, message)` failure reports.
pub trait FailureReporter: Send + Sync {
    fn report(&self, code: i32, message: &str);
}
