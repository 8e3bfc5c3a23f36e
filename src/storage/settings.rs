//! Settings storage
//!
//! Optional `settings.json` holding a [`SessionConfig`]. Command-line flags
//! are applied on top of whatever is loaded here.

use crate::storage::{get_config_dir, StorageError};
use crate::types::config::SessionConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> SessionConfig {
    let loaded = get_settings_path().and_then(|path| load_settings_from(&path));
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            SessionConfig::default()
        }
    }
}

/// Load and validate settings stored at `path`
pub fn load_settings_from(path: &Path) -> Result<SessionConfig, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(SessionConfig::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: SessionConfig = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to the default location
pub fn save_settings(settings: &SessionConfig) -> Result<PathBuf, StorageError> {
    let path = get_settings_path()?;
    save_settings_to(settings, &path)?;
    Ok(path)
}

pub fn save_settings_to(settings: &SessionConfig, path: &Path) -> Result<(), StorageError> {
    // Ensure the parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}
