//! Infrastructure layer for monaco-kit
//!
//! Contains low-level building blocks: release handles and worker plumbing.

pub mod disposable;
pub mod worker;

pub use disposable::{Disposable, DisposableStore, DisposeTarget, as_disposable, dispose_all};
