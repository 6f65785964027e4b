//! SecretCodec: pairing codes, identifiers, and the blob envelope.
//!
//! Every blob on a channel is one JSON envelope:
//!
//! ```json
//! {"type":"round1","version":1,"sender":"<client id>","payload":{...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use codepair_core::ClientId;
use codepair_security::{CodeError, CodePolicy, PairingCode, RoundMessage, SealedPayload};

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Code(#[from] CodeError),

    #[error("cannot encode message: {0}")]
    Encoding(String),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "round1")]
    RoundOne,
    #[serde(rename = "round2")]
    RoundTwo,
    #[serde(rename = "payload")]
    Payload,
}

/// What a channel blob carries, once unwrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RoundOne(RoundMessage),
    RoundTwo(RoundMessage),
    Payload(SealedPayload),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::RoundOne(_) => MessageKind::RoundOne,
            Message::RoundTwo(_) => MessageKind::RoundTwo,
            Message::Payload(_) => MessageKind::Payload,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    version: u32,
    sender: ClientId,
    payload: Value,
}

/// Generates codes and identifiers under one policy, and moves messages in
/// and out of channel blobs.
#[derive(Debug, Clone)]
pub struct SecretCodec {
    policy: CodePolicy,
}

impl SecretCodec {
    pub fn new(policy: CodePolicy) -> Result<Self, CodecError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &CodePolicy {
        &self.policy
    }

    /// A fresh secret and channel id.
    pub fn generate_code(&self) -> Result<PairingCode, CodecError> {
        Ok(self.policy.generate()?)
    }

    pub fn parse_code(&self, input: &str) -> Result<PairingCode, CodecError> {
        Ok(PairingCode::parse(input)?)
    }

    pub fn new_client_id(&self) -> ClientId {
        ClientId::generate()
    }

    pub fn encode(&self, sender: &ClientId, message: &Message) -> Result<Vec<u8>, CodecError> {
        let payload = match message {
            Message::RoundOne(m) | Message::RoundTwo(m) => serde_json::to_value(m),
            Message::Payload(p) => serde_json::to_value(p),
        }
        .map_err(|e| CodecError::Encoding(e.to_string()))?;

        let envelope = Envelope {
            kind: message.kind(),
            version: ENVELOPE_VERSION,
            sender: sender.clone(),
            payload,
        };
        serde_json::to_vec(&envelope).map_err(|e| CodecError::Encoding(e.to_string()))
    }

    /// Unwrap a blob into its sender and message.
    pub fn decode(&self, body: &[u8]) -> Result<(ClientId, Message), CodecError> {
        let envelope: Envelope =
            serde_json::from_slice(body).map_err(|e| CodecError::Malformed(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedVersion(envelope.version));
        }

        let message = match envelope.kind {
            MessageKind::RoundOne => Message::RoundOne(round(envelope.payload, 1)?),
            MessageKind::RoundTwo => Message::RoundTwo(round(envelope.payload, 2)?),
            MessageKind::Payload => Message::Payload(
                serde_json::from_value(envelope.payload).map_err(|e| CodecError::Malformed(e.to_string()))?,
            ),
        };
        Ok((envelope.sender, message))
    }
}

fn round(payload: Value, expected: u8) -> Result<RoundMessage, CodecError> {
    let message: RoundMessage =
        serde_json::from_value(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if message.round != expected {
        return Err(CodecError::Malformed(format!(
            "round{expected} envelope carries a round {} message",
            message.round
        )));
    }
    Ok(message)
}
