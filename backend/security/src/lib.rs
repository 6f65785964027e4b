//! Cryptography for codepair: the key agreement party, pairing codes, and
//! sealing of the application payload.

mod group;
pub mod party;
pub mod payload;
pub mod setup_code;

pub use party::{AgreementError, DerivedKey, KeyAgreementParty, RoundMessage, KEY_LEN};
pub use payload::{open, seal, PayloadError, SealedPayload};
pub use setup_code::{CodeError, CodePolicy, PairingCode, CODE_SEPARATOR, DEFAULT_ALPHABET};
