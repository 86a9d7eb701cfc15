//! Data models for monaco-kit
//!
//! Contains core type definitions used throughout the application.

pub mod config;
pub mod document;
pub mod providers;
pub mod theme;

// Re-export commonly used types
pub use config::{KitConfig, PluginSpec};
pub use document::{
    CompletionItem, Diagnostic, DiagnosticSeverity, FormattingOptions, Hover, Position, Range,
    TextDocument, TextEdit,
};
pub use providers::{Capability, Providers};
pub use theme::{ThemeData, ThemeMap, ThemeSelection};
