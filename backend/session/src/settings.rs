//! Runtime knobs for a pairing session.

use std::time::Duration;

use codepair_config::{defaults, PairingConfig};
use codepair_core::{KeyStrength, PairingError};
use codepair_security::CodePolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub strength: KeyStrength,
    pub poll_interval: Duration,
    /// Fetches allowed in one waiting state before giving up.
    pub max_poll_attempts: u32,
    /// Upper bound on one relay request. An expired request counts as a
    /// transient network error.
    pub request_timeout: Duration,
    /// Wall-clock limit for the whole session.
    pub deadline: Option<Duration>,
    pub code_policy: CodePolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            strength: KeyStrength::default(),
            poll_interval: Duration::from_millis(defaults::DEFAULT_POLL_INTERVAL_MS),
            max_poll_attempts: defaults::DEFAULT_MAX_POLL_ATTEMPTS,
            request_timeout: Duration::from_millis(defaults::DEFAULT_REQUEST_TIMEOUT_MS),
            deadline: None,
            code_policy: CodePolicy::default(),
        }
    }
}

impl SessionSettings {
    /// Build settings from a loaded config. Unset fields keep their defaults.
    pub fn from_config(config: &PairingConfig) -> Result<Self, PairingError> {
        let mut settings = Self::default();
        if let Some(strength) = config.strength {
            settings.strength = strength;
        }
        if let Some(ms) = config.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = config.max_poll_attempts {
            settings.max_poll_attempts = attempts;
        }
        if let Some(ms) = config.request_timeout_ms {
            settings.request_timeout = Duration::from_millis(ms);
        }
        settings.deadline = config.session_deadline_secs.map(Duration::from_secs);

        if let Some(code) = &config.code {
            if let Some(alphabet) = &code.alphabet {
                settings.code_policy.alphabet = alphabet.clone();
            }
            if let Some(length) = code.length {
                settings.code_policy.length = length;
            }
            if let Some(channel_length) = code.channel_length {
                settings.code_policy.channel_length = channel_length;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PairingError> {
        if self.poll_interval.is_zero() {
            return Err(PairingError::InvalidParameters("poll interval must be positive".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(PairingError::InvalidParameters("max poll attempts must be positive".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(PairingError::InvalidParameters("request timeout must be positive".into()));
        }
        self.code_policy
            .validate()
            .map_err(|e| PairingError::InvalidParameters(e.to_string()))
    }
}
