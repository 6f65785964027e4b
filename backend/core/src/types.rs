use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relay routing key for one pairing. Generated locally, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Marks which side of a pairing wrote an envelope, so a session can
/// recognise its own echo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for a new session.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque version token for a channel blob (an HTTP ETag on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTag(String);

impl EntityTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A blob as stored on the relay, with its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBlob {
    pub body: Vec<u8>,
    pub etag: EntityTag,
}

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// The blob still carries the token the caller already knows.
    Unchanged,
    /// The blob carries a different token than the caller supplied.
    Modified(ChannelBlob),
}

/// Key agreement security level.
///
/// Each level selects an elliptic-curve group; `modulus_bits` reports the
/// classic finite-field modulus it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrength {
    /// NIST P-256.
    #[default]
    Standard,
    /// NIST P-384.
    High,
    /// NIST P-521.
    Maximum,
}

impl KeyStrength {
    pub const ALL: [KeyStrength; 3] = [KeyStrength::Standard, KeyStrength::High, KeyStrength::Maximum];

    pub fn modulus_bits(self) -> u32 {
        match self {
            KeyStrength::Standard => 1024,
            KeyStrength::High => 2048,
            KeyStrength::Maximum => 3072,
        }
    }

    pub fn curve_name(self) -> &'static str {
        match self {
            KeyStrength::Standard => "P-256",
            KeyStrength::High => "P-384",
            KeyStrength::Maximum => "P-521",
        }
    }
}

impl fmt::Display for KeyStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStrength::Standard => "standard",
            KeyStrength::High => "high",
            KeyStrength::Maximum => "maximum",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for KeyStrength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "1024" => Ok(KeyStrength::Standard),
            "high" | "2048" => Ok(KeyStrength::High),
            "maximum" | "3072" => Ok(KeyStrength::Maximum),
            other => Err(format!("unknown key strength '{other}'")),
        }
    }
}

/// Which side of a pairing a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Generates and displays the code, publishes first, sends the payload.
    Initiator,
    /// Types the code in, reads first, receives the payload.
    Joiner,
}

impl Role {
    /// Identity bound into the key agreement transcript.
    pub fn identity(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Joiner => "joiner",
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Joiner,
            Role::Joiner => Role::Initiator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity())
    }
}
