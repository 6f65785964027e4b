//! Config file read/write.

use crate::schema::PairingConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the codepair config directory.
/// Priority: `CODEPAIR_CONFIG_DIR` env > `~/.codepair/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CODEPAIR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".codepair"),
        None => PathBuf::from(".codepair"),
    }
}

/// Resolve the full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(path: &Path) -> Result<PairingConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(PairingConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file parses as YAML null.
    if raw.trim().is_empty() {
        return Ok(PairingConfig::default());
    }

    let config: PairingConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Write config to disk atomically (write to temp file, rename).
pub async fn write_config(config: &PairingConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}
