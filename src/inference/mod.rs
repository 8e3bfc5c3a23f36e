//! LLM inference
//!
//! This module handles all interaction with llama-cpp for model loading and inference.

pub mod engine;
pub mod model;
pub mod streaming;

pub use engine::{EngineError, InstructionExecutor, LlamaEngine};
pub use streaming::{StreamToken, TokenStream};
