//! Model types
//!
//! Defines where the checkpoint used for this run comes from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A resolved model checkpoint
///
/// Built once per run by the model locator and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReference {
    /// Local path handed to the inference session
    pub path: PathBuf,
    /// URL the file was fetched from, when the default model was used
    pub source_url: Option<String>,
    /// File name derived from the source URL
    pub file_name: Option<String>,
}

impl ModelReference {
    /// A path typed in by the user, used verbatim
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source_url: None,
            file_name: None,
        }
    }

    /// A file obtained from `source_url`
    pub fn fetched(path: PathBuf, source_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            path,
            source_url: Some(source_url.into()),
            file_name: Some(file_name.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the default model was fetched for this run
    pub fn is_default(&self) -> bool {
        self.source_url.is_some()
    }

    /// Name shown to the user
    pub fn display_name(&self) -> String {
        match &self.file_name {
            Some(name) => name.clone(),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_reference() {
        let model = ModelReference::local("/opt/models/llama.gguf");
        assert!(!model.is_default());
        assert_eq!(model.display_name(), "llama.gguf");
        assert_eq!(model.path(), Path::new("/opt/models/llama.gguf"));
    }

    #[test]
    fn test_fetched_reference() {
        let model = ModelReference::fetched(
            PathBuf::from("Models/model-X.bin"),
            "https://host/path/model-X.bin",
            "model-X.bin",
        );
        assert!(model.is_default());
        assert_eq!(model.display_name(), "model-X.bin");
    }
}
