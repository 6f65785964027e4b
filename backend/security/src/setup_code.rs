//! Pairing code generation and parsing.
//!
//! A pairing code is what the human carries between devices. It has two
//! parts joined by `-`: the secret, which becomes the key agreement
//! password, and the channel id, which tells the joiner where to look.
//! For example `7QKMX4TB-h3wd`.

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use codepair_core::ChannelId;

/// Separates the secret from the channel id in a displayed code.
pub const CODE_SEPARATOR: char = '-';

/// Digits and uppercase letters without the easily confused 0, O, 1 and I.
pub const DEFAULT_ALPHABET: &str = "23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

pub const DEFAULT_CODE_LENGTH: usize = 8;
pub const DEFAULT_CHANNEL_LENGTH: usize = 4;

/// Shortest secret accepted from a user.
pub const MIN_CODE_LENGTH: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("invalid code policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid pairing code: {0}")]
    InvalidCode(String),
}

/// How pairing codes are generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePolicy {
    pub alphabet: String,
    pub length: usize,
    pub channel_length: usize,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            length: DEFAULT_CODE_LENGTH,
            channel_length: DEFAULT_CHANNEL_LENGTH,
        }
    }
}

impl CodePolicy {
    pub fn validate(&self) -> Result<(), CodeError> {
        let chars: Vec<char> = self.alphabet.chars().collect();
        if chars.len() < 10 {
            return Err(CodeError::InvalidPolicy("alphabet needs at least 10 characters".into()));
        }
        let mut unique = chars.clone();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != chars.len() {
            return Err(CodeError::InvalidPolicy("alphabet has duplicate characters".into()));
        }
        if chars.iter().any(|c| !c.is_ascii_alphanumeric() || c.is_ascii_lowercase()) {
            return Err(CodeError::InvalidPolicy(
                "alphabet may only contain digits and uppercase ASCII letters".into(),
            ));
        }
        if self.length < MIN_CODE_LENGTH {
            return Err(CodeError::InvalidPolicy(format!(
                "code length must be at least {MIN_CODE_LENGTH}"
            )));
        }
        if self.channel_length < 2 {
            return Err(CodeError::InvalidPolicy("channel length must be at least 2".into()));
        }
        Ok(())
    }

    /// Bits of entropy in the secret part.
    pub fn entropy_bits(&self) -> f64 {
        let size = self.alphabet.chars().count() as f64;
        size.log2() * self.length as f64
    }

    /// Draw a fresh code, every character uniformly from the alphabet.
    pub fn generate(&self) -> Result<PairingCode, CodeError> {
        self.validate()?;
        let alphabet: Vec<char> = self.alphabet.chars().collect();
        let secret = Zeroizing::new(random_string(&alphabet, self.length));
        let channel = random_string(&alphabet, self.channel_length).to_ascii_lowercase();
        debug!(channel = %channel, length = self.length, "Pairing code generated");
        Ok(PairingCode { secret, channel: ChannelId::new(channel) })
    }
}

fn random_string(alphabet: &[char], len: usize) -> String {
    let mut rng = OsRng;
    (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect()
}

/// A secret plus the channel it is used on. The secret is zeroed on drop.
#[derive(Clone)]
pub struct PairingCode {
    secret: Zeroizing<String>,
    channel: ChannelId,
}

impl PairingCode {
    /// Pair a known secret with a channel, normalized the way [`parse`]
    /// normalizes typed codes: uppercase secret, lowercase channel.
    ///
    /// [`parse`]: PairingCode::parse
    pub fn new(secret: impl Into<String>, channel: ChannelId) -> Self {
        let raw = Zeroizing::new(secret.into());
        Self {
            secret: Zeroizing::new(raw.trim().to_ascii_uppercase()),
            channel: ChannelId::new(channel.as_str().to_ascii_lowercase()),
        }
    }

    /// Parse what the user typed, e.g. ` 7qkmx4tb-h3wd `.
    ///
    /// Surrounding whitespace is dropped and the secret is uppercased so
    /// codes are case-insensitive.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let (secret, channel) = input
            .trim()
            .split_once(CODE_SEPARATOR)
            .ok_or_else(|| CodeError::InvalidCode(format!("missing '{CODE_SEPARATOR}' separator")))?;

        let secret = Zeroizing::new(secret.to_ascii_uppercase());
        if secret.chars().count() < MIN_CODE_LENGTH {
            return Err(CodeError::InvalidCode("secret is too short".into()));
        }
        if !secret.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CodeError::InvalidCode("secret may only contain letters and digits".into()));
        }
        let channel = channel.to_ascii_lowercase();
        if channel.is_empty()
            || !channel.chars().all(|c| c.is_ascii_alphanumeric() || c == CODE_SEPARATOR)
        {
            return Err(CodeError::InvalidCode("channel id is empty or not URL-safe".into()));
        }
        Ok(Self { secret, channel: ChannelId::new(channel) })
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// The full code to show to the user.
    pub fn display(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}{CODE_SEPARATOR}{}", self.secret.as_str(), self.channel))
    }
}

impl std::fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingCode")
            .field("secret", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}
