//! Config validation with user-friendly error messages.

use std::collections::HashSet;

use crate::schema::PairingConfig;
use thiserror::Error;

/// Codes below this many bits of entropy are accepted with a warning.
pub const MIN_RECOMMENDED_ENTROPY_BITS: f64 = 30.0;

const MIN_CODE_LENGTH: usize = 4;
const MIN_CHANNEL_LENGTH: usize = 2;
const MIN_ALPHABET_SIZE: usize = 10;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError { path: path.into(), message: message.into() });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError { path: path.into(), message: message.into() });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &PairingConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_polling(config, &mut report);
    validate_code(config, &mut report);
    report
}

fn validate_server(config: &PairingConfig, report: &mut ValidationReport) {
    let Some(server) = &config.server else {
        report.warn("server", "No relay server configured; pass --server to pair");
        return;
    };
    if !(server.starts_with("http://") || server.starts_with("https://")) {
        report.error("server", format!("Must be an http(s) URL, got '{server}'"));
    } else if server.starts_with("http://") {
        report.warn("server", "Relay is reached over plain http");
    }
}

fn validate_polling(config: &PairingConfig, report: &mut ValidationReport) {
    if config.poll_interval_ms == Some(0) {
        report.error("pollIntervalMs", "Must be greater than 0");
    }
    if config.max_poll_attempts == Some(0) {
        report.error("maxPollAttempts", "Must be greater than 0");
    }
    if config.request_timeout_ms == Some(0) {
        report.error("requestTimeoutMs", "Must be greater than 0");
    }
    if config.session_deadline_secs == Some(0) {
        report.error("sessionDeadlineSecs", "Must be greater than 0 when set");
    }
}

fn validate_code(config: &PairingConfig, report: &mut ValidationReport) {
    let Some(code) = &config.code else { return };

    let mut alphabet_size = None;
    if let Some(alphabet) = &code.alphabet {
        if alphabet.chars().any(|c| c == '-' || c.is_whitespace()) {
            report.error("code.alphabet", "Must not contain '-' or whitespace");
        } else if alphabet.chars().any(|c| !c.is_ascii_alphanumeric() || c.is_ascii_lowercase()) {
            report.error("code.alphabet", "Must contain only digits and uppercase ASCII letters");
        }
        let unique: HashSet<char> = alphabet.chars().collect();
        if unique.len() != alphabet.chars().count() {
            report.error("code.alphabet", "Must not repeat characters");
        } else if unique.len() < MIN_ALPHABET_SIZE {
            report.error(
                "code.alphabet",
                format!("Needs at least {MIN_ALPHABET_SIZE} distinct characters, has {}", unique.len()),
            );
        }
        alphabet_size = Some(unique.len());
    }

    if let Some(length) = code.length {
        if length < MIN_CODE_LENGTH {
            report.error("code.length", format!("Must be at least {MIN_CODE_LENGTH}"));
        }
        if let Some(size) = alphabet_size.filter(|s| *s > 1) {
            let bits = length as f64 * (size as f64).log2();
            if bits < MIN_RECOMMENDED_ENTROPY_BITS {
                report.warn(
                    "code.length",
                    format!("Codes carry only {bits:.1} bits of entropy; consider a longer code"),
                );
            }
        }
    }

    if let Some(channel_length) = code.channel_length {
        if channel_length < MIN_CHANNEL_LENGTH {
            report.error("code.channelLength", format!("Must be at least {MIN_CHANNEL_LENGTH}"));
        }
    }
}
