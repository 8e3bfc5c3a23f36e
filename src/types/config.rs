//! Configuration types
//!
//! Inference-time parameters for one run of the assistant.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Checkpoint fetched when the user gives no model path
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/TheBloke/CodeLlama-7B-Instruct-GGUF/resolve/main/codellama-7b-instruct.Q4_K_S.gguf";

/// Code Llama instruct markers
pub const INSTRUCTION_PREFIX: &str = "[INST]";
pub const INSTRUCTION_SUFFIX: &str = "[/INST]";

pub const SYSTEM_INSTRUCTION: &str = "You're an intelligent, concise coding assistant. Wrap code in ``` for readability. Don't repeat yourself. Use best practice and good coding standards.";

/// Submitted in place of an empty instruction
pub const FALLBACK_INSTRUCTION: &str = "Ask me for instructions.";

const VALID_CONTEXT_SIZES: [u32; 9] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Context window size in tokens
    pub context_size: u32,
    /// Seed for the sampler's random distribution
    pub seed: u32,
    /// Number of layers to offload to the GPU (0 = CPU only)
    pub gpu_layers: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Maximum tokens per answer, `None` runs until end of generation
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_instruction_prefix")]
    pub instruction_prefix: String,
    #[serde(default = "default_instruction_suffix")]
    pub instruction_suffix: String,
    /// Prepended to the first instruction only
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_fallback_instruction")]
    pub fallback_instruction: String,
    /// Upper bound on one answer's generation time
    #[serde(default)]
    pub generation_timeout_secs: Option<u64>,
    /// Upper bound on the default model download
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

fn default_instruction_prefix() -> String {
    INSTRUCTION_PREFIX.to_string()
}

fn default_instruction_suffix() -> String {
    INSTRUCTION_SUFFIX.to_string()
}

fn default_system_instruction() -> String {
    SYSTEM_INSTRUCTION.to_string()
}

fn default_fallback_instruction() -> String {
    FALLBACK_INSTRUCTION.to_string()
}

fn default_download_timeout() -> u64 {
    3600 // 1 hour for multi-GB checkpoints
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_size: 4096,
            seed: 1337,
            gpu_layers: 5,
            temperature: 0.8,
            max_tokens: None,
            instruction_prefix: default_instruction_prefix(),
            instruction_suffix: default_instruction_suffix(),
            system_instruction: default_system_instruction(),
            fallback_instruction: default_fallback_instruction(),
            generation_timeout_secs: None,
            download_timeout_secs: default_download_timeout(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration values
    ///
    /// Clamps everything into ranges llama.cpp accepts.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);

        if !VALID_CONTEXT_SIZES.contains(&self.context_size) {
            let requested = self.context_size;
            self.context_size = *VALID_CONTEXT_SIZES
                .iter()
                .min_by_key(|&&size| (size as i64 - requested as i64).abs())
                .unwrap_or(&4096);
            tracing::warn!(
                "Context size {} is not supported, using {}",
                requested,
                self.context_size
            );
        }

        // Can't generate more than the context holds
        if let Some(max) = self.max_tokens {
            self.max_tokens = Some(max.clamp(1, self.context_size));
        }

        if self.generation_timeout_secs == Some(0) {
            self.generation_timeout_secs = None;
        }

        if self.download_timeout_secs == 0 {
            self.download_timeout_secs = default_download_timeout();
        }

        if self.fallback_instruction.trim().is_empty() {
            self.fallback_instruction = default_fallback_instruction();
        }
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_secs.map(Duration::from_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.context_size, 4096);
        assert_eq!(config.seed, 1337);
        assert_eq!(config.gpu_layers, 5);
        assert_eq!(config.temperature, 0.8);
        assert!(config.max_tokens.is_none());
        assert_eq!(config.instruction_prefix, "[INST]");
        assert_eq!(config.instruction_suffix, "[/INST]");
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();

        config.temperature = 5.0;
        config.validate();
        assert_eq!(config.temperature, 2.0);

        config.context_size = 3000;
        config.validate();
        assert_eq!(config.context_size, 2048);

        config.max_tokens = Some(1_000_000);
        config.validate();
        assert_eq!(config.max_tokens, Some(2048));

        config.generation_timeout_secs = Some(0);
        config.fallback_instruction = "  ".to_string();
        config.validate();
        assert!(config.generation_timeout().is_none());
        assert_eq!(config.fallback_instruction, FALLBACK_INSTRUCTION);
    }

    #[test]
    fn test_config_serialization() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: SessionConfig = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"context_size": 8192, "seed": 7, "gpu_layers": 0, "temperature": 0.2}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.context_size, 8192);
        assert_eq!(config.system_instruction, SYSTEM_INSTRUCTION);
        assert_eq!(config.download_timeout_secs, 3600);
    }
}
