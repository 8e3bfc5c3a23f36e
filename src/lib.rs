//! codellama-instruct library
//!
//! Core library for the interactive Code Llama instruct console.

pub mod app;
pub mod cli;
pub mod console;
pub mod inference;
pub mod storage;
pub mod types;
