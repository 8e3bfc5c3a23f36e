//! Model downloader
//!
//! Makes sure a checkpoint named after its source URL exists in the models
//! directory, fetching it over HTTP the first time.

use crate::console::Console;
use crate::storage::StorageError;
use crate::types::message::Role;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Transport that writes the body at `url` into `dest`
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns the number of bytes written. Gives up with
    /// [`StorageError::Cancelled`] once `cancel` is set.
    async fn download(&self, url: &str, dest: &Path, cancel: &AtomicBool) -> Result<u64, StorageError>;
}

/// Last path segment of `url`, case preserved
///
/// `https://host/path/model-X.bin` gives `model-X.bin`.
pub fn file_name_from_url(url: &str) -> Result<String, StorageError> {
    let trimmed = url.trim();
    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);

    let (_, rest) = no_fragment
        .split_once("://")
        .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;

    // Host only, nothing to name the file after
    let Some((_, path)) = rest.split_once('/') else {
        return Err(StorageError::InvalidUrl(url.to_string()));
    };

    let segment = path.rsplit('/').next().unwrap_or_default();
    sanitize_local_filename(segment).ok_or_else(|| StorageError::InvalidUrl(url.to_string()))
}

fn sanitize_local_filename(filename: &str) -> Option<String> {
    let trimmed = filename.trim();

    let mut sanitized = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// HTTP transport backed by reqwest
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("codellama-instruct/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path, cancel: &AtomicBool) -> Result<u64, StorageError> {
        tracing::info!("Downloading from: {}", url);
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let total_size = response.content_length();
        if let Some(total) = total_size {
            tracing::info!("File size: {}", format_size(total));
        }

        let mut file = File::create(dest).await?;
        let mut downloaded: u64 = 0;
        let mut last_step: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            if cancel.load(Ordering::Relaxed) {
                return Err(StorageError::Cancelled);
            }
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total_size.filter(|&t| t > 0) {
                let step = downloaded * 20 / total;
                if step > last_step {
                    last_step = step;
                    tracing::info!(
                        "Downloaded {} of {} ({}%)",
                        format_size(downloaded),
                        format_size(total),
                        step * 5
                    );
                }
            }
        }
        file.flush().await?;

        if let Some(expected) = total_size {
            if downloaded != expected {
                return Err(StorageError::Incomplete {
                    got: downloaded,
                    expected,
                });
            }
        }

        Ok(downloaded)
    }
}

/// Keeps downloaded assets in one directory
pub struct AssetFetcher<D> {
    models_dir: PathBuf,
    downloader: D,
    cancel: Arc<AtomicBool>,
}

impl<D: Downloader> AssetFetcher<D> {
    pub fn new(models_dir: impl Into<PathBuf>, downloader: D) -> Self {
        Self {
            models_dir: models_dir.into(),
            downloader,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort downloads when `cancel` is set
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Return the local copy of `url`, downloading it when missing
    ///
    /// An existing non-empty file is reused without touching the network.
    /// The body is streamed into a `.part` file that only replaces the
    /// target once complete, so a failed download never leaves a file
    /// that a later run would mistake for the model.
    pub async fn fetch(&self, url: &str, console: &mut dyn Console) -> Result<PathBuf, StorageError> {
        let file_name = file_name_from_url(url)?;
        fs::create_dir_all(&self.models_dir)?;

        let output_path = self.models_dir.join(&file_name);
        if output_path.exists() {
            let metadata = fs::metadata(&output_path)?;
            if metadata.len() > 0 {
                tracing::info!("Model already exists: {:?}", output_path);
                console.write_line(
                    Role::System,
                    &format!("Existing model found, using {}", output_path.display()),
                )?;
                return Ok(output_path);
            }
            tracing::warn!("Ignoring empty model file {:?}", output_path);
        }

        console.write_line(
            Role::System,
            &format!("Model not found locally, downloading {}...", url),
        )?;

        let temp_path = self.models_dir.join(format!("{}.part", file_name));
        let bytes = match self.downloader.download(url, &temp_path, &self.cancel).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if temp_path.exists() {
                    if let Err(rm) = fs::remove_file(&temp_path) {
                        tracing::warn!("Failed to remove partial download {:?}: {}", temp_path, rm);
                    }
                }
                return Err(e);
            }
        };

        fs::rename(&temp_path, &output_path)?;
        tracing::info!("Download complete: {:?} ({})", output_path, format_size(bytes));
        console.write_line(
            Role::System,
            &format!("Model downloaded and saved to {}", output_path.display()),
        )?;

        Ok(output_path)
    }
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}
