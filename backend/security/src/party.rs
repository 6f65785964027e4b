//! Password-authenticated key agreement for one participant.
//!
//! SPAKE2 with explicit key confirmation, split into two rounds:
//!
//! | Round | Sends | Needs from peer |
//! |-------|-------|-----------------|
//! | 1 | `element = x·G + w·M` (or `N` for the other side) | nothing |
//! | 2 | `confirm = HMAC(Kc_self, TT)` | round 1 |
//! | key | `Ke` | round 2, whose MAC must verify |
//!
//! `w` is the code hashed to a scalar and `TT` is the transcript hash over
//! both identities, both elements, the shared point and `w`. A wrong code
//! yields a different `TT`, so the peer MAC fails and `derive_key` returns
//! `KeyDerivationFailed` without saying more.

use std::collections::BTreeMap;

use elliptic_curve::ff::{Field, PrimeField};
use elliptic_curve::group::{Group, GroupEncoding};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use codepair_core::KeyStrength;

use crate::group::{decode_point, encode_point, fixed_point, hash_to_scalar, random_nonzero_scalar};

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of every derived key.
pub const KEY_LEN: usize = 32;

const PASSWORD_DOMAIN: &[u8] = b"codepair/spake2/password";
const TRANSCRIPT_DOMAIN: &[u8] = b"codepair/spake2/transcript/v1";

const FIELD_ELEMENT: &str = "element";
const FIELD_CONFIRM: &str = "confirm";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgreementError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// One round's worth of key-agreement data. Opaque outside this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMessage {
    pub round: u8,
    /// Identity of the party that produced the message.
    pub signer: String,
    /// Named, hex-encoded fields.
    pub fields: BTreeMap<String, String>,
}

impl RoundMessage {
    fn new(round: u8, signer: &str, field: &str, value: &[u8]) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), hex::encode(value));
        Self { round, signer: signer.to_string(), fields }
    }

    fn field(&self, name: &str) -> Result<Vec<u8>, AgreementError> {
        let raw = self
            .fields
            .get(name)
            .ok_or_else(|| AgreementError::MalformedMessage(format!("missing field '{name}'")))?;
        hex::decode(raw).map_err(|_| AgreementError::MalformedMessage(format!("field '{name}' is not hex")))
    }
}

/// The shared key. Zeroed on drop; compares in constant time.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for DerivedKey {}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

enum Step<G: Group> {
    Fresh,
    SentOne { x: G::Scalar, element: G },
    SentTwo { key: DerivedKey, peer_confirm_key: Zeroizing<[u8; KEY_LEN]>, transcript: [u8; 32] },
    Finished,
}

/// SPAKE2 state for a single group.
struct Exchange<G: Group + GroupEncoding> {
    identity: String,
    peer_identity: String,
    w: G::Scalar,
    own_blind: G,
    peer_blind: G,
    step: Step<G>,
}

impl<G: Group + GroupEncoding> Exchange<G> {
    fn new(password: &str, identity: &str, peer_identity: &str) -> Result<Self, AgreementError> {
        let w: G::Scalar = hash_to_scalar(PASSWORD_DOMAIN, &[password.as_bytes()]);
        if bool::from(w.is_zero()) {
            return Err(AgreementError::InvalidParameters("password hashes to zero".into()));
        }
        let m = fixed_point::<G>(b"codepair/spake2/M")
            .ok_or_else(|| AgreementError::InvalidParameters("no blinding point M".into()))?;
        let n = fixed_point::<G>(b"codepair/spake2/N")
            .ok_or_else(|| AgreementError::InvalidParameters("no blinding point N".into()))?;

        // The lexically smaller identity blinds with M.
        let (own_blind, peer_blind) = if identity < peer_identity { (m, n) } else { (n, m) };

        Ok(Self {
            identity: identity.to_string(),
            peer_identity: peer_identity.to_string(),
            w,
            own_blind,
            peer_blind,
            step: Step::Fresh,
        })
    }

    fn round_one(&mut self) -> Result<RoundMessage, AgreementError> {
        if !matches!(self.step, Step::Fresh) {
            return Err(AgreementError::ProtocolMisuse("round one already generated"));
        }
        let x: G::Scalar = random_nonzero_scalar();
        let element = G::generator() * x + self.own_blind * self.w;
        let message = RoundMessage::new(1, &self.identity, FIELD_ELEMENT, &encode_point(&element));
        self.step = Step::SentOne { x, element };
        Ok(message)
    }

    fn round_two(&mut self, peer: &RoundMessage) -> Result<RoundMessage, AgreementError> {
        let (x, element) = match &self.step {
            Step::SentOne { x, element } => (*x, *element),
            Step::Fresh => return Err(AgreementError::ProtocolMisuse("round one not generated yet")),
            _ => return Err(AgreementError::ProtocolMisuse("round two already generated")),
        };
        self.check_origin(peer, 1)?;

        let peer_element = decode_point::<G>(&peer.field(FIELD_ELEMENT)?)
            .ok_or_else(|| AgreementError::MalformedMessage("peer element is not a valid group element".into()))?;
        let shared = (peer_element - self.peer_blind * self.w) * x;
        if bool::from(shared.is_identity()) {
            return Err(AgreementError::MalformedMessage("degenerate peer element".into()));
        }

        let transcript = self.transcript(&element, &peer_element, &shared);
        let hk = Hkdf::<Sha256>::new(None, &transcript);
        let mut key = [0u8; KEY_LEN];
        let mut own_confirm_key = Zeroizing::new([0u8; KEY_LEN]);
        let mut peer_confirm_key = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(b"codepair/key", &mut key)
            .and_then(|_| hk.expand(confirm_info(&self.identity).as_bytes(), &mut own_confirm_key[..]))
            .and_then(|_| hk.expand(confirm_info(&self.peer_identity).as_bytes(), &mut peer_confirm_key[..]))
            .map_err(|_| AgreementError::KeyDerivationFailed)?;

        let mut mac = HmacSha256::new_from_slice(&own_confirm_key[..])
            .map_err(|_| AgreementError::KeyDerivationFailed)?;
        mac.update(&transcript);
        let tag = mac.finalize().into_bytes();

        let message = RoundMessage::new(2, &self.identity, FIELD_CONFIRM, &tag);
        self.step = Step::SentTwo {
            key: DerivedKey::from_bytes(key),
            peer_confirm_key,
            transcript,
        };
        Ok(message)
    }

    fn derive_key(&mut self, peer: &RoundMessage) -> Result<DerivedKey, AgreementError> {
        let Step::SentTwo { key, peer_confirm_key, transcript } = &self.step else {
            return Err(AgreementError::ProtocolMisuse("round two not generated yet"));
        };
        self.check_origin(peer, 2)?;
        let tag = peer.field(FIELD_CONFIRM)?;

        let mut mac = HmacSha256::new_from_slice(&peer_confirm_key[..])
            .map_err(|_| AgreementError::KeyDerivationFailed)?;
        mac.update(transcript);
        if mac.verify_slice(&tag).is_err() {
            debug!(identity = %self.identity, "Peer key confirmation did not verify");
            return Err(AgreementError::KeyDerivationFailed);
        }

        let key = key.clone();
        self.step = Step::Finished;
        Ok(key)
    }

    fn check_origin(&self, peer: &RoundMessage, round: u8) -> Result<(), AgreementError> {
        if peer.round != round {
            return Err(AgreementError::MalformedMessage(format!(
                "expected round {round}, got round {}",
                peer.round
            )));
        }
        if peer.signer != self.peer_identity {
            return Err(AgreementError::MalformedMessage(format!(
                "unexpected signer '{}'",
                peer.signer
            )));
        }
        Ok(())
    }

    /// Transcript hash in a fixed order (M side first) so both parties agree.
    fn transcript(&self, own: &G, peer: &G, shared: &G) -> [u8; 32] {
        let own_bytes = encode_point(own);
        let peer_bytes = encode_point(peer);
        let shared_bytes = encode_point(shared);
        let w_repr = self.w.to_repr();

        let (first_id, second_id, first_el, second_el) = if self.identity < self.peer_identity {
            (&self.identity, &self.peer_identity, &own_bytes, &peer_bytes)
        } else {
            (&self.peer_identity, &self.identity, &peer_bytes, &own_bytes)
        };

        let mut hasher = Sha256::new();
        for part in [
            TRANSCRIPT_DOMAIN,
            first_id.as_bytes(),
            second_id.as_bytes(),
            first_el.as_slice(),
            second_el.as_slice(),
            shared_bytes.as_slice(),
            w_repr.as_ref(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        hasher.finalize().into()
    }
}

fn confirm_info(identity: &str) -> String {
    format!("codepair/confirm/{identity}")
}

enum Suite {
    P256(Exchange<p256::ProjectivePoint>),
    P384(Exchange<p384::ProjectivePoint>),
    P521(Exchange<p521::ProjectivePoint>),
}

macro_rules! dispatch {
    ($suite:expr, $ex:ident => $body:expr) => {
        match $suite {
            Suite::P256($ex) => $body,
            Suite::P384($ex) => $body,
            Suite::P521($ex) => $body,
        }
    };
}

/// One participant in a pairing key agreement.
pub struct KeyAgreementParty {
    strength: KeyStrength,
    suite: Suite,
}

impl KeyAgreementParty {
    /// Both sides must use the same password and strength, and each must name
    /// the other's identity as `peer_identity`.
    pub fn new(
        password: &str,
        identity: &str,
        peer_identity: &str,
        strength: KeyStrength,
    ) -> Result<Self, AgreementError> {
        if password.is_empty() {
            return Err(AgreementError::InvalidParameters("password must not be empty".into()));
        }
        if identity.is_empty() || peer_identity.is_empty() {
            return Err(AgreementError::InvalidParameters("identities must not be empty".into()));
        }
        if identity == peer_identity {
            return Err(AgreementError::InvalidParameters("identity and peer identity must differ".into()));
        }

        let suite = match strength {
            KeyStrength::Standard => Suite::P256(Exchange::new(password, identity, peer_identity)?),
            KeyStrength::High => Suite::P384(Exchange::new(password, identity, peer_identity)?),
            KeyStrength::Maximum => Suite::P521(Exchange::new(password, identity, peer_identity)?),
        };
        debug!(identity, peer_identity, curve = strength.curve_name(), "Key agreement party created");
        Ok(Self { strength, suite })
    }

    pub fn strength(&self) -> KeyStrength {
        self.strength
    }

    /// May be called once.
    pub fn generate_round_one(&mut self) -> Result<RoundMessage, AgreementError> {
        dispatch!(&mut self.suite, ex => ex.round_one())
    }

    pub fn generate_round_two(&mut self, peer_round_one: &RoundMessage) -> Result<RoundMessage, AgreementError> {
        dispatch!(&mut self.suite, ex => ex.round_two(peer_round_one))
    }

    pub fn derive_key(&mut self, peer_round_two: &RoundMessage) -> Result<DerivedKey, AgreementError> {
        dispatch!(&mut self.suite, ex => ex.derive_key(peer_round_two))
    }
}
