//! Log Redaction
//!
//! Scrubs pairing codes and raw key material from strings prior to logging.

use regex::Regex;
use std::sync::LazyLock;

/// `SECRET-channel`, as shown to and typed by the user.
static PAIRING_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9A-Z]{4,32}-[0-9a-z][0-9a-z-]{0,31}\b").unwrap());

/// 32 or more bytes of hex: keys, MACs, ciphertext.
static HEX_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{64,}\b").unwrap());

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = PAIRING_CODE_RE.replace_all(input, "[REDACTED_CODE]");
    HEX_KEY_RE.replace_all(&redacted, "[REDACTED_KEY]").into_owned()
}
