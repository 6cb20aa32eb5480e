//! Configuration IO helpers.

use crate::config::{CompanionConfig, validate_config};
use dirs_next::{config_dir, home_dir};
use std::env;
use std::fs;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "DOCBRIDGE_CONFIG_PATH";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docbridge")
        .join("companion.json")
}

/// Loads configuration from the default path.
pub fn load_config() -> anyhow::Result<CompanionConfig> {
    let path = default_config_path();
    load_config_from_path(&path)
}

/// Loads configuration from a specific path. A missing file yields defaults.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<CompanionConfig> {
    if !path.exists() {
        return Ok(CompanionConfig::default());
    }

    let content = fs::read_to_string(path)?;
    Ok(CompanionConfig::from_json(&content)?)
}

/// Saves configuration to a specific path, creating parent directories.
pub fn save_config_to_path(config: &CompanionConfig, path: &Path) -> anyhow::Result<()> {
    validate_config(config)?;
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    write(path, content)?;
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if path == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(path)
}
