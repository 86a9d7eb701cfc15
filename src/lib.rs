//! monaco-kit - plugin and language-worker composition for the Monaco editor
//!
//! Loads one shared editor engine, installs plugins against it in dependency
//! order and routes language-service requests to per-label workers running
//! on threads or child processes.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod models;
pub mod services;

pub use error::{KitError, KitResult};
