//! Shared type definitions
//!
//! This module contains the data types passed between the locator, the
//! inference session and the interactive loop.

pub mod config;
pub mod message;
pub mod model;
