//! Sealing of the one application payload sent after key agreement.
//!
//! AES-256-GCM under a key expanded from the derived key with HKDF-SHA256.
//! The channel id is bound as associated data so a sealed payload cannot be
//! replayed onto another channel.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use codepair_core::ChannelId;

use crate::party::DerivedKey;

const NONCE_LEN: usize = 12;
const PAYLOAD_KEY_INFO: &[u8] = b"codepair/payload/aes-256-gcm";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload encoding failed: {0}")]
    Encoding(String),

    #[error("payload is malformed: {0}")]
    Malformed(String),

    /// Wrong key, wrong channel, or tampered ciphertext.
    #[error("payload authentication failed")]
    Authentication,
}

/// A sealed payload as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Hex-encoded 96-bit nonce.
    pub nonce: String,
    /// Hex-encoded ciphertext with the GCM tag appended.
    pub ciphertext: String,
}

fn cipher_for(key: &DerivedKey) -> Result<Aes256Gcm, PayloadError> {
    let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(PAYLOAD_KEY_INFO, &mut okm[..])
        .map_err(|e| PayloadError::Encoding(e.to_string()))?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&okm[..])))
}

/// Serialize `payload` as JSON and seal it for `channel`.
pub fn seal(key: &DerivedKey, channel: &ChannelId, payload: &serde_json::Value) -> Result<SealedPayload, PayloadError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| PayloadError::Encoding(e.to_string()))?,
    );
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher_for(key)?
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload { msg: &plaintext, aad: channel.as_str().as_bytes() },
        )
        .map_err(|_| PayloadError::Encoding("encryption failed".into()))?;

    Ok(SealedPayload { nonce: hex::encode(nonce_bytes), ciphertext: hex::encode(ciphertext) })
}

/// Authenticate and decrypt a payload sealed for `channel`.
pub fn open(key: &DerivedKey, channel: &ChannelId, sealed: &SealedPayload) -> Result<serde_json::Value, PayloadError> {
    let nonce = hex::decode(&sealed.nonce).map_err(|_| PayloadError::Malformed("nonce is not hex".into()))?;
    if nonce.len() != NONCE_LEN {
        return Err(PayloadError::Malformed(format!("nonce must be {NONCE_LEN} bytes")));
    }
    let ciphertext =
        hex::decode(&sealed.ciphertext).map_err(|_| PayloadError::Malformed("ciphertext is not hex".into()))?;

    let plaintext = Zeroizing::new(
        cipher_for(key)?
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: &ciphertext, aad: channel.as_str().as_bytes() },
            )
            .map_err(|_| PayloadError::Authentication)?,
    );

    serde_json::from_slice(&plaintext).map_err(|e| PayloadError::Malformed(e.to_string()))
}
