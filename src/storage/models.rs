//! Model locator
//!
//! Turns the user's answer to the model path prompt into a checkpoint path.

use crate::console::Console;
use crate::storage::download::{file_name_from_url, AssetFetcher, Downloader};
use crate::storage::StorageError;
use crate::types::message::Role;
use crate::types::model::ModelReference;

/// Resolve the model to load
///
/// A non-blank answer is used verbatim and not checked here; a bad path
/// only fails when the session loads it. A blank answer fetches
/// `default_url` into the models directory.
pub async fn resolve_model<D: Downloader>(
    input: Option<&str>,
    default_url: &str,
    fetcher: &AssetFetcher<D>,
    console: &mut dyn Console,
) -> Result<ModelReference, StorageError> {
    if let Some(path) = input.filter(|p| !p.trim().is_empty()) {
        tracing::info!("Using model path from input: {}", path);
        return Ok(ModelReference::local(path));
    }

    let file_name = file_name_from_url(default_url)?;
    console.write_line(
        Role::System,
        &format!("The following model will be used: {}", file_name),
    )?;

    let path = fetcher.fetch(default_url, console).await?;
    Ok(ModelReference::fetched(path, default_url, file_name))
}
