//! Resolve the effective config: file, then command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use codepair_config::{config_dir, config_file_path, load_config, prepare, PairingConfig};
use codepair_core::KeyStrength;

/// Values given on the command line win over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub server: Option<String>,
    pub strength: Option<KeyStrength>,
}

pub fn default_config_path() -> PathBuf {
    config_file_path(&config_dir())
}

pub async fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<PairingConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let config = load_config(&path).await?;
    prepare(apply_overrides(config, overrides))
        .with_context(|| format!("Config at {} is not usable", path.display()))
}

fn apply_overrides(mut config: PairingConfig, overrides: &Overrides) -> PairingConfig {
    if let Some(server) = &overrides.server {
        config.server = Some(server.clone());
    }
    if let Some(strength) = overrides.strength {
        config.strength = Some(strength);
    }
    config
}
