//! codepair configuration schema.
//!
//! Every field is optional on disk; `defaults::apply_all_defaults` fills in
//! whatever the user left out.

use codepair_core::KeyStrength;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingConfig {
    /// Base URL of the relay, e.g. `https://relay.example.net`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<KeyStrength>,

    /// Delay between two polls of the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    /// Polls allowed per waiting state before the session times out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_poll_attempts: Option<u32>,

    /// Upper bound on a single relay request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Wall-clock limit for the whole session. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_deadline_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alphabet: Option<String>,
    /// Characters in the secret part of the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Characters in the channel part of the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    /// Post failure reports to `{server}/report`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for the rolling JSON log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}
