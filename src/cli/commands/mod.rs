//! Command implementations for monaco-kit
//!
//! Each command is implemented in its own module.

pub mod config;
pub mod load;
pub mod plugins;
pub mod resolve;
