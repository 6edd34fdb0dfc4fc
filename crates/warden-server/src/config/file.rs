// crates/warden-server/src/config/file.rs
// TOML configuration file loading

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::Config;

/// Candidate locations for the default config file, in order.
fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("warden.toml")];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(PathBuf::from(home).join(".warden/config.toml"));
    }
    paths
}

/// Load configuration from an explicit TOML file. Missing file is an error
/// when the path was given explicitly.
pub fn load_file(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load configuration from the first default location that exists, or
/// plain defaults when none does.
pub fn load_default_file() -> Result<Config> {
    for path in default_paths() {
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading config file");
            return load_file(&path);
        }
    }
    Ok(Config::default())
}
