//! Command-line arguments
//!
//! Every flag is optional; unset flags keep the value from the settings
//! file or the built-in default.

use crate::types::config::{SessionConfig, DEFAULT_MODEL_URL};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "codellama-instruct", version, about = "Interactive Code Llama instruct console")]
pub struct Cli {
    /// Path to a local model file; skips the model path prompt
    #[arg(short = 'm', long)]
    pub model: Option<PathBuf>,

    /// Checkpoint downloaded when no model path is given
    #[arg(long, default_value = DEFAULT_MODEL_URL)]
    pub model_url: String,

    /// Directory for downloaded models (default: `Models` next to the executable)
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// Size of the context window in tokens
    #[arg(short = 'c', long)]
    pub context_size: Option<u32>,

    /// Seed for the sampler
    #[arg(short = 's', long)]
    pub seed: Option<u32>,

    /// How many layers to keep on the GPU - zero is CPU mode
    #[arg(short = 'g', long)]
    pub gpu_layers: Option<u32>,

    /// Sampling temperature
    #[arg(short = 't', long)]
    pub temperature: Option<f32>,

    /// Maximum tokens per answer (default: until the model stops)
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stop an answer after this many seconds
    #[arg(long, value_name = "SECS")]
    pub generation_timeout: Option<u64>,

    /// Give up on the model download after this many seconds
    #[arg(long, value_name = "SECS")]
    pub download_timeout: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Forward llama.cpp's own logs to the log output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Write the effective settings to the settings file
    #[arg(long)]
    pub save_settings: bool,
}

impl Cli {
    /// Overlay the flags that were given onto `config`, then validate
    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(context_size) = self.context_size {
            config.context_size = context_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(gpu_layers) = self.gpu_layers {
            config.gpu_layers = gpu_layers;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = Some(max_tokens);
        }
        if let Some(timeout) = self.generation_timeout {
            config.generation_timeout_secs = Some(timeout);
        }
        if let Some(timeout) = self.download_timeout {
            config.download_timeout_secs = timeout;
        }
        config.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_keeps_config() {
        let cli = Cli::try_parse_from(["codellama-instruct"]).unwrap();
        assert_eq!(cli.model_url, DEFAULT_MODEL_URL);
        assert!(cli.model.is_none());

        let mut config = SessionConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "codellama-instruct",
            "-m",
            "/models/code.gguf",
            "-c",
            "8192",
            "-g",
            "0",
            "--temperature",
            "0.2",
            "--max-tokens",
            "512",
            "--generation-timeout",
            "60",
            "--no-color",
        ])
        .unwrap();

        let mut config = SessionConfig::default();
        cli.apply(&mut config);
        assert_eq!(cli.model, Some(PathBuf::from("/models/code.gguf")));
        assert!(cli.no_color);
        assert_eq!(config.context_size, 8192);
        assert_eq!(config.gpu_layers, 0);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.max_tokens, Some(512));
        assert_eq!(config.generation_timeout_secs, Some(60));
        assert_eq!(config.seed, 1337);
    }

    #[test]
    fn test_invalid_flag_values_are_clamped() {
        let cli = Cli::try_parse_from(["codellama-instruct", "-t", "7.5"]).unwrap();
        let mut config = SessionConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.temperature, 2.0);
    }
}
