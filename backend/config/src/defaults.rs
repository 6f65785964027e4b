//! Config defaults: applies default values to parsed config.

use codepair_core::KeyStrength;

use crate::schema::{CodeConfig, LoggingConfig, PairingConfig, ReportConfig};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Five minutes of polling at the default interval.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 300;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_CODE_ALPHABET: &str = "23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
pub const DEFAULT_CODE_LENGTH: usize = 8;
pub const DEFAULT_CHANNEL_LENGTH: usize = 4;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: PairingConfig) -> PairingConfig {
    let config = apply_polling_defaults(config);
    let config = apply_code_defaults(config);
    let config = apply_report_defaults(config);
    apply_logging_defaults(config)
}

fn apply_polling_defaults(mut config: PairingConfig) -> PairingConfig {
    config.strength.get_or_insert(KeyStrength::Standard);
    config.poll_interval_ms.get_or_insert(DEFAULT_POLL_INTERVAL_MS);
    config.max_poll_attempts.get_or_insert(DEFAULT_MAX_POLL_ATTEMPTS);
    config.request_timeout_ms.get_or_insert(DEFAULT_REQUEST_TIMEOUT_MS);
    config
}

fn apply_code_defaults(mut config: PairingConfig) -> PairingConfig {
    let code = config.code.get_or_insert_with(CodeConfig::default);
    if code.alphabet.is_none() {
        code.alphabet = Some(DEFAULT_CODE_ALPHABET.to_string());
    }
    code.length.get_or_insert(DEFAULT_CODE_LENGTH);
    code.channel_length.get_or_insert(DEFAULT_CHANNEL_LENGTH);
    config
}

/// Reporting is only on by default when there is a server to report to.
fn apply_report_defaults(mut config: PairingConfig) -> PairingConfig {
    let has_server = config.server.is_some();
    let report = config.report.get_or_insert_with(ReportConfig::default);
    report.enabled.get_or_insert(has_server);
    config
}

fn apply_logging_defaults(mut config: PairingConfig) -> PairingConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    config
}
