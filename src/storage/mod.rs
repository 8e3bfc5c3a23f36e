//! Persistent storage
//!
//! This module handles everything that touches the disk: the models
//! directory, the default model download and the settings file.

pub mod download;
pub mod models;
pub mod settings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Name of the models directory placed next to the executable
pub const MODELS_DIR_NAME: &str = "Models";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine the user data directory")]
    NoDataDir,
    #[error("Invalid model URL: {0}")]
    InvalidUrl(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Download failed with status: {0}")]
    HttpStatus(u16),
    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
    #[error("Download cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            StorageError::HttpStatus(status.as_u16())
        } else if e.is_timeout() {
            StorageError::Download("timed out".to_string())
        } else {
            StorageError::Download(e.to_string())
        }
    }
}

fn project_dirs() -> Result<ProjectDirs, StorageError> {
    ProjectDirs::from("dev", "codellama", "codellama-instruct").ok_or(StorageError::NoDataDir)
}

/// Per-user data directory
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Per-user config directory
pub fn get_config_dir() -> Result<PathBuf, StorageError> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// `Models` directory colocated with the running program
///
/// Falls back to the user data directory when the executable location
/// can't be determined.
pub fn default_models_dir() -> Result<PathBuf, StorageError> {
    match std::env::current_exe() {
        Ok(exe) => match exe.parent() {
            Some(dir) => Ok(dir.join(MODELS_DIR_NAME)),
            None => Ok(get_data_dir()?.join(MODELS_DIR_NAME)),
        },
        Err(e) => {
            tracing::warn!("Failed to locate executable, using data dir for models: {}", e);
            Ok(get_data_dir()?.join(MODELS_DIR_NAME))
        }
    }
}
