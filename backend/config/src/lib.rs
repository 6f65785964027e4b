//! `codepair-config`: codepair runtime configuration.
//!
//! Provides:
//! - Typed config schema
//! - YAML read/write
//! - `${ENV_VAR}` substitution
//! - Default value application
//! - Validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use schema::{CodeConfig, LoggingConfig, PairingConfig, ReportConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Load, apply env substitution, apply defaults, and validate a config file.
///
/// This is the main entry point for loading a config at runtime.
pub async fn load_and_prepare(path: &Path) -> Result<PairingConfig> {
    let raw_config = load_config(path).await?;
    prepare(raw_config)
}

/// The in-memory half of [`load_and_prepare`].
pub fn prepare(raw_config: PairingConfig) -> Result<PairingConfig> {
    let value: Value =
        serde_json::to_value(&raw_config).context("Failed to serialize config for processing")?;

    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;

    let config: PairingConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.first() {
        bail!("invalid config ({} error(s)): {first}", report.errors.len());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_and_prepare_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "server: https://relay.example.net\npollIntervalMs: 200\n")
            .await
            .unwrap();

        let cfg = load_and_prepare(&path).await.unwrap();
        assert_eq!(cfg.poll_interval_ms, Some(200));
        assert_eq!(cfg.max_poll_attempts, Some(defaults::DEFAULT_MAX_POLL_ATTEMPTS));
        assert_eq!(cfg.report.unwrap().enabled, Some(true));
    }

    #[tokio::test]
    async fn load_and_prepare_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "maxPollAttempts: 0\n").await.unwrap();

        let err = load_and_prepare(&path).await.unwrap_err().to_string();
        assert!(err.contains("maxPollAttempts"));
    }
}
