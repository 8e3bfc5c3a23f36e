//! Interactive instruction loop
//!
//! Wires the model locator, the inference session and the console together
//! and runs the instruction loop until it is cancelled or input ends.

use crate::cli::Cli;
use crate::console::{Console, TerminalConsole};
use crate::inference::{EngineError, InstructionExecutor, LlamaEngine};
use crate::storage::download::{AssetFetcher, HttpDownloader};
use crate::storage::models::resolve_model;
use crate::storage::settings::{load_settings, save_settings};
use crate::storage::{default_models_dir, StorageError};
use crate::types::config::SessionConfig;
use crate::types::message::Role;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub const MODEL_PATH_PROMPT: &str =
    "Please input your model path (if left empty, a default model will be downloaded for you): ";
pub const INSTRUCTION_PROMPT: &str = "Instruction: ";

const BANNER: &str = "The executor has been enabled. In this example, the LLM will follow your instructions. \
It's a 7B Code Llama, so it's trained for programming tasks like \"Write a Rust function reading a file name from a given URI\" \
or \"Write some programming interview questions\".";

/// Top-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Console error: {0}")]
    Io(#[from] io::Error),
    #[error("Instruction loop panicked")]
    LoopPanicked,
}

/// State of the instruction loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    AwaitingInstruction,
    /// Holds the instruction being answered
    Streaming(String),
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    EndOfInput,
}

/// Reads instructions, streams answers
pub struct InteractiveLoop<'a, E, C> {
    executor: &'a mut E,
    console: &'a mut C,
    config: &'a SessionConfig,
    cancel: Arc<AtomicBool>,
    turns: usize,
}

impl<'a, E, C> InteractiveLoop<'a, E, C>
where
    E: InstructionExecutor,
    C: Console,
{
    pub fn new(
        executor: &'a mut E,
        console: &'a mut C,
        config: &'a SessionConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            executor,
            console,
            config,
            cancel,
            turns: 0,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Run until cancelled or input ends
    ///
    /// Generation errors end the loop and are returned to the caller.
    pub fn run(&mut self) -> Result<LoopExit, AppError> {
        let mut state = LoopState::AwaitingInstruction;
        loop {
            if self.cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            state = match state {
                LoopState::AwaitingInstruction => {
                    let Some(line) = self.console.prompt(INSTRUCTION_PROMPT)? else {
                        tracing::info!("End of input after {} turns", self.turns);
                        return Ok(LoopExit::EndOfInput);
                    };
                    LoopState::Streaming(self.next_instruction(&line))
                }
                LoopState::Streaming(instruction) => {
                    self.stream_answer(&instruction)?;
                    self.turns += 1;
                    LoopState::AwaitingInstruction
                }
            };
        }
    }

    /// Build the instruction for this turn
    ///
    /// Blank input becomes the fallback instruction. Only the first turn
    /// carries the system instruction.
    fn next_instruction(&self, line: &str) -> String {
        let line = if line.trim().is_empty() {
            self.config.fallback_instruction.as_str()
        } else {
            line
        };

        if self.turns == 0 {
            format!("{}\n{}", self.config.system_instruction, line)
        } else {
            line.to_string()
        }
    }

    fn stream_answer(&mut self, instruction: &str) -> Result<(), AppError> {
        tracing::debug!("Turn {}: submitting {} bytes", self.turns + 1, instruction.len());
        let stream = self.executor.infer(&format!("{}\n", instruction))?;
        for fragment in stream {
            let text = fragment?;
            self.console.write(Role::Generated, &text)?;
            if self.cancelled() {
                // Dropping the stream stops the worker
                break;
            }
        }
        self.console.write(Role::System, "\n")?;
        Ok(())
    }
}

/// Model path from the command line, or asked for on the console
///
/// Stdin blocks, so the prompt runs outside the async scheduler.
fn model_path_input<C: Console>(model: Option<&Path>, console: &mut C) -> io::Result<Option<String>> {
    match model {
        Some(path) => Ok(Some(path.to_string_lossy().into_owned())),
        None => tokio::task::block_in_place(|| console.prompt(MODEL_PATH_PROMPT)),
    }
}

/// Run the assistant with the given command line
pub async fn run(cli: Cli, cancel: Arc<AtomicBool>) -> Result<LoopExit, AppError> {
    let mut config = load_settings();
    cli.apply(&mut config);
    tracing::debug!("Session config: {:?}", config);

    if cli.save_settings {
        let path = save_settings(&config)?;
        tracing::info!("Settings saved to {:?}", path);
    }

    if cli.no_color {
        colored::control::set_override(false);
    }
    let mut console = TerminalConsole::stdio(!cli.no_color);

    let input = model_path_input(cli.model.as_deref(), &mut console)?;

    let models_dir = match &cli.models_dir {
        Some(dir) => dir.clone(),
        None => default_models_dir()?,
    };
    let fetcher = AssetFetcher::new(models_dir, HttpDownloader::new(config.download_timeout())?)
        .with_cancel(cancel.clone());
    tracing::debug!("Models directory: {:?}", fetcher.models_dir());

    let model = resolve_model(input.as_deref(), &cli.model_url, &fetcher, &mut console).await?;
    if model.is_default() {
        tracing::info!("Using default model {:?}", model.path());
    }
    if cancel.load(Ordering::Relaxed) {
        return Ok(LoopExit::Cancelled);
    }

    // Loading and the loop itself block, keep them off the async workers
    tokio::task::spawn_blocking(move || -> Result<LoopExit, AppError> {
        tracing::info!("Loading {}", model.display_name());
        let mut engine = LlamaEngine::load(model.path(), &config, cancel.clone())?;

        console.write_line(Role::System, BANNER)?;
        let exit = InteractiveLoop::new(&mut engine, &mut console, &config, cancel).run()?;
        Ok(exit)
    })
    .await
    .map_err(|_| AppError::LoopPanicked)?
}
