//! Instruct executor over llama-cpp
//!
//! The backend, weights and context live on one worker thread for the
//! whole session. Instructions are sent to it one at a time; each answer
//! comes back as a [`TokenStream`].

use crate::inference::model::{build_sampler, context_params, load_model, PROMPT_BATCH_SIZE};
use crate::inference::streaming::{StreamToken, TokenStream, Utf8Assembler};
use crate::types::config::SessionConfig;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Inference errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to initialize llama backend: {0}")]
    Backend(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Failed to create context: {0}")]
    ContextCreate(String),
    #[error("Tokenization failed: {0}")]
    Tokenize(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Generation worker stopped")]
    WorkerGone,
}

/// Something that answers instructions with a stream of text fragments
pub trait InstructionExecutor {
    fn infer(&mut self, instruction: &str) -> Result<TokenStream, EngineError>;
}

struct Request {
    instruction: String,
    tx: Sender<StreamToken>,
    stop: Arc<AtomicBool>,
}

/// Handle to the generation worker
pub struct LlamaEngine {
    requests: Option<Sender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl LlamaEngine {
    /// Load the model and create its context
    ///
    /// Blocks until the worker reports the session ready, so load failures
    /// surface here rather than on the first instruction. `cancel` is
    /// checked between generated tokens.
    pub fn load(
        model_path: impl Into<PathBuf>,
        config: &SessionConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, EngineError> {
        let model_path = model_path.into();
        let config = config.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (requests_tx, requests_rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("llama-worker".to_string())
            .spawn(move || {
                let mut ready = Some(ready_tx);
                if let Err(e) = run_worker(&model_path, &config, &cancel, &mut ready, requests_rx) {
                    match ready.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(e));
                        }
                        None => tracing::error!("Generation worker failed: {}", e),
                    }
                }
            })
            .map_err(|e| EngineError::Backend(format!("failed to spawn worker: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                requests: Some(requests_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(EngineError::WorkerGone)
            }
        }
    }
}

impl InstructionExecutor for LlamaEngine {
    fn infer(&mut self, instruction: &str) -> Result<TokenStream, EngineError> {
        let requests = self.requests.as_ref().ok_or(EngineError::WorkerGone)?;
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        requests
            .send(Request {
                instruction: instruction.to_string(),
                tx,
                stop: stop.clone(),
            })
            .map_err(|_| EngineError::WorkerGone)?;
        Ok(TokenStream::new(rx, stop))
    }
}

impl Drop for LlamaEngine {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Generation worker panicked");
            }
        }
        tracing::debug!("Inference session released");
    }
}

fn run_worker(
    model_path: &Path,
    config: &SessionConfig,
    cancel: &AtomicBool,
    ready: &mut Option<SyncSender<Result<(), EngineError>>>,
    requests: Receiver<Request>,
) -> Result<(), EngineError> {
    let backend = LlamaBackend::init().map_err(|e| EngineError::Backend(e.to_string()))?;
    let model = load_model(&backend, model_path, config)?;
    let ctx = model
        .new_context(&backend, context_params(config))
        .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

    tracing::info!("Context ready ({} tokens)", ctx.n_ctx());
    if let Some(tx) = ready.take() {
        let _ = tx.send(Ok(()));
    }

    let mut session = InstructSession::new(&model, ctx, config);
    for request in requests {
        let outcome = session.answer(&request, cancel);
        let message = match outcome {
            Ok(()) => StreamToken::Done,
            Err(e) => {
                tracing::warn!("Generation ended with error: {}", e);
                StreamToken::Error(e.to_string())
            }
        };
        let _ = request.tx.send(message);
    }
    Ok(())
}

/// Why generation for one instruction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    EndOfGeneration,
    MaxTokens,
    Cancelled,
    TimedOut,
    ReceiverDropped,
}

/// Instruction wrapped in the instruct markers
///
/// Only the very first prompt of a context opens with the
/// beginning-of-sequence token.
fn instruct_prompt(prefix: &str, suffix: &str, instruction: &str, n_past: i32) -> (String, AddBos) {
    let add_bos = if n_past == 0 {
        AddBos::Always
    } else {
        AddBos::Never
    };
    (format!("{}{}{}", prefix, instruction, suffix), add_bos)
}

/// Tokens of the first prompt pinned at the start of the context
///
/// Capped at half the window so a shift can always free space.
fn pinned_tokens(first_prompt_len: usize, n_ctx: i32) -> i32 {
    (first_prompt_len as i32).min(n_ctx / 2)
}

/// Tokens to drop when the context is full: half of everything after the
/// pinned prefix, oldest first
fn shift_amount(n_past: i32, n_keep: i32) -> i32 {
    (n_past - n_keep).max(0) / 2
}

/// Conversation held in one llama context
///
/// The context keeps every previous turn, so each instruction only feeds
/// its own tokens. When it fills up, the oldest half of the turns after
/// the first prompt is discarded and the rest slides down.
struct InstructSession<'m> {
    model: &'m LlamaModel,
    ctx: LlamaContext<'m>,
    sampler: LlamaSampler,
    prefix: String,
    suffix: String,
    max_tokens: Option<u32>,
    timeout: Option<Duration>,
    n_past: i32,
    n_keep: i32,
}

impl<'m> InstructSession<'m> {
    fn new(model: &'m LlamaModel, ctx: LlamaContext<'m>, config: &SessionConfig) -> Self {
        Self {
            model,
            ctx,
            sampler: build_sampler(config),
            prefix: config.instruction_prefix.clone(),
            suffix: config.instruction_suffix.clone(),
            max_tokens: config.max_tokens,
            timeout: config.generation_timeout(),
            n_past: 0,
            n_keep: 0,
        }
    }

    fn n_ctx(&self) -> i32 {
        self.ctx.n_ctx() as i32
    }

    /// Discard old turns from the KV cache; false when nothing can go
    fn shift_context(&mut self) -> Result<bool, EngineError> {
        let n_discard = shift_amount(self.n_past, self.n_keep);
        if n_discard == 0 {
            return Ok(false);
        }

        let discard_start = self.n_keep as u32;
        let discard_end = (self.n_keep + n_discard) as u32;
        self.ctx
            .clear_kv_cache_seq(Some(0), Some(discard_start), Some(discard_end))
            .map_err(|e| EngineError::Generation(format!("context shift failed: {}", e)))?;
        self.ctx
            .kv_cache_seq_add(0, Some(discard_end), Some(self.n_past as u32), -n_discard)
            .map_err(|e| EngineError::Generation(format!("context shift failed: {}", e)))?;
        self.n_past -= n_discard;

        tracing::info!(
            "Context full, discarded {} tokens ({} kept)",
            n_discard,
            self.n_past
        );
        Ok(true)
    }

    /// Make room for `needed` more tokens
    fn ensure_room(&mut self, needed: i32) -> Result<(), EngineError> {
        while self.n_past + needed > self.n_ctx() {
            if !self.shift_context()? {
                return Err(EngineError::Generation(format!(
                    "{} tokens do not fit in the {}-token context",
                    needed,
                    self.n_ctx()
                )));
            }
        }
        Ok(())
    }

    /// Decode one generated token into the context
    fn feed(&mut self, batch: &mut LlamaBatch, token: LlamaToken) -> Result<(), EngineError> {
        self.ensure_room(1)?;
        batch.clear();
        batch
            .add(token, self.n_past, &[0], true)
            .map_err(|e| EngineError::Generation(e.to_string()))?;
        self.ctx
            .decode(batch)
            .map_err(|e| EngineError::Generation(format!("failed to eval: {}", e)))?;
        self.n_past += 1;
        Ok(())
    }

    fn answer(&mut self, request: &Request, cancel: &AtomicBool) -> Result<(), EngineError> {
        let started = Instant::now();

        let (prompt, add_bos) =
            instruct_prompt(&self.prefix, &self.suffix, &request.instruction, self.n_past);
        let first_prompt = self.n_past == 0;
        let tokens = self
            .model
            .str_to_token(&prompt, add_bos)
            .map_err(|e| EngineError::Tokenize(e.to_string()))?;

        if tokens.is_empty() {
            return Ok(());
        }
        // Leave room for at least one answer token
        self.ensure_room(tokens.len() as i32 + 1)?;

        let mut batch = LlamaBatch::new(PROMPT_BATCH_SIZE, 1);
        let last_index = tokens.len() - 1;
        for (chunk_index, chunk) in tokens.chunks(PROMPT_BATCH_SIZE).enumerate() {
            batch.clear();
            for (offset, token) in chunk.iter().enumerate() {
                let index = chunk_index * PROMPT_BATCH_SIZE + offset;
                batch
                    .add(*token, self.n_past, &[0], index == last_index)
                    .map_err(|e| EngineError::Generation(e.to_string()))?;
                self.n_past += 1;
            }
            self.ctx
                .decode(&mut batch)
                .map_err(|e| EngineError::Generation(format!("llama_decode() failed: {}", e)))?;
        }
        if first_prompt {
            self.n_keep = pinned_tokens(tokens.len(), self.n_ctx());
        }
        tracing::debug!("Prompt ingested: {} tokens, {} in context", tokens.len(), self.n_past);

        let mut decoder = Utf8Assembler::default();
        let mut generated: u32 = 0;
        let reason = loop {
            if cancel.load(Ordering::Relaxed) || request.stop.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            if self.timeout.is_some_and(|limit| started.elapsed() >= limit) {
                break StopReason::TimedOut;
            }
            if self.max_tokens.is_some_and(|max| generated >= max) {
                break StopReason::MaxTokens;
            }

            let token = self.sampler.sample(&self.ctx, batch.n_tokens() - 1);
            if self.model.is_eog_token(token) {
                // The next turn's prefix follows a closed answer
                self.feed(&mut batch, token)?;
                break StopReason::EndOfGeneration;
            }

            let bytes = self
                .model
                .token_to_bytes(token, Special::Plaintext)
                .map_err(|e| EngineError::Generation(e.to_string()))?;
            let text = decoder.push(&bytes);
            if !text.is_empty() && request.tx.send(StreamToken::Token(text)).is_err() {
                break StopReason::ReceiverDropped;
            }

            self.feed(&mut batch, token)?;
            generated += 1;
        };

        let tail = decoder.finish();
        if !tail.is_empty() {
            let _ = request.tx.send(StreamToken::Token(tail));
        }

        if reason == StopReason::TimedOut {
            tracing::warn!("Generation timed out after {:?}", started.elapsed());
        }
        tracing::debug!(
            "Generated {} tokens in {:.2}s ({:?})",
            generated,
            started.elapsed().as_secs_f32(),
            reason
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let result = LlamaEngine::load(
            dir.path().join("missing.gguf"),
            &SessionConfig::default(),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(result, Err(EngineError::ModelLoad(_))));
    }

    #[test]
    fn test_instruct_prompt_wraps_instruction() {
        let (prompt, add_bos) = instruct_prompt("[INST]", "[/INST]", "write a parser\n", 0);
        assert_eq!(prompt, "[INST]write a parser\n[/INST]");
        assert!(matches!(add_bos, AddBos::Always));
    }

    #[test]
    fn test_bos_only_on_first_turn() {
        let (prompt, add_bos) = instruct_prompt("[INST]", "[/INST]", "again\n", 137);
        assert_eq!(prompt, "[INST]again\n[/INST]");
        assert!(matches!(add_bos, AddBos::Never));
    }

    #[test]
    fn test_shift_drops_half_after_pinned_prefix() {
        assert_eq!(shift_amount(4096, 96), 2000);
        assert_eq!(shift_amount(4096, 0), 2048);
        // Nothing to drop once only the pinned prefix is left
        assert_eq!(shift_amount(96, 96), 0);
        assert_eq!(shift_amount(97, 96), 0);
    }

    #[test]
    fn test_repeated_shifts_always_free_room() {
        let n_ctx = 4096;
        let n_keep = pinned_tokens(120, n_ctx);
        let mut n_past = n_ctx;
        let needed = 1500;
        while n_past + needed > n_ctx {
            let discard = shift_amount(n_past, n_keep);
            assert!(discard > 0, "stuck at {} tokens", n_past);
            n_past -= discard;
        }
        assert!(n_past >= n_keep);
    }

    #[test]
    fn test_pinned_prefix_is_capped() {
        assert_eq!(pinned_tokens(120, 4096), 120);
        assert_eq!(pinned_tokens(3000, 4096), 2048);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            EngineError::Generation("boom".to_string()).to_string(),
            "Generation failed: boom"
        );
        assert_eq!(EngineError::WorkerGone.to_string(), "Generation worker stopped");
    }
}
