//! Model and context construction
//!
//! Maps a [`SessionConfig`] onto llama-cpp parameter types.

use crate::inference::engine::EngineError;
use crate::types::config::SessionConfig;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::path::Path;

/// Tokens submitted per decode call while ingesting a prompt
pub const PROMPT_BATCH_SIZE: usize = 512;

pub fn model_params(config: &SessionConfig) -> LlamaModelParams {
    LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers)
}

pub fn context_params(config: &SessionConfig) -> LlamaContextParams {
    LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(config.context_size))
        .with_n_batch(PROMPT_BATCH_SIZE as u32)
}

/// Temperature + seeded distribution; greedy at temperature 0
pub fn build_sampler(config: &SessionConfig) -> LlamaSampler {
    if config.temperature <= 0.0 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::temp(config.temperature),
            LlamaSampler::dist(config.seed),
        ])
    }
}

/// Load weights from `path`
///
/// Fails when the file is missing or not a checkpoint llama.cpp supports.
pub fn load_model(
    backend: &LlamaBackend,
    path: &Path,
    config: &SessionConfig,
) -> Result<LlamaModel, EngineError> {
    if !path.exists() {
        return Err(EngineError::ModelLoad(format!(
            "model file not found: {}",
            path.display()
        )));
    }

    tracing::info!(
        "Loading model {:?} ({} GPU layers)",
        path,
        config.gpu_layers
    );
    let params = model_params(config);
    LlamaModel::load_from_file(backend, path, &params)
        .map_err(|e| EngineError::ModelLoad(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_params_follow_config() {
        let config = SessionConfig::default();
        let params = context_params(&config);
        assert_eq!(params.n_ctx(), NonZeroU32::new(4096));
        assert_eq!(params.n_batch(), PROMPT_BATCH_SIZE as u32);
    }

    #[test]
    fn test_model_params_follow_config() {
        let config = SessionConfig::default();
        assert_eq!(model_params(&config).n_gpu_layers(), 5);
    }
}
