//! Editor engine and its process-wide slot
//!
//! An [`Engine`] owns everything the crate manages on behalf of the editor:
//! worker routing, the theme table, registered languages, keybindings and the
//! set of installed plugins. One engine is loaded per [`EngineSlot`] and
//! shared by every consumer.

pub mod editor;
pub mod slot;
pub mod source;
pub mod themes;

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

pub use editor::{Keybinding, KeybindingTable, LanguageDefinition, LanguageRegistry};
pub use slot::{EngineSlot, PendingEngine};
pub use source::{BundledEngineSource, EngineSource, LoaderOptions, LocalEngineSource};
pub use themes::ThemeService;

use super::workers::WorkerManager;

/// Lifecycle of an engine load as seen by consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

impl LoadState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Loading)
    }
}

pub struct Engine {
    workers: WorkerManager,
    themes: ThemeService,
    languages: LanguageRegistry,
    keybindings: KeybindingTable,
    installed: Mutex<Vec<String>>,
}

impl Engine {
    pub fn new(base_worker_path: impl Into<String>) -> Self {
        Self {
            workers: WorkerManager::new(base_worker_path),
            themes: ThemeService::new(),
            languages: LanguageRegistry::default(),
            keybindings: KeybindingTable::default(),
            installed: Mutex::new(Vec::new()),
        }
    }

    pub fn workers(&self) -> &WorkerManager {
        &self.workers
    }

    pub fn themes(&self) -> &ThemeService {
        &self.themes
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn keybindings(&self) -> &KeybindingTable {
        &self.keybindings
    }

    pub fn is_installed(&self, plugin: &str) -> bool {
        self.installed().iter().any(|p| p == plugin)
    }

    /// Installed plugin names, in install order
    pub fn installed_plugins(&self) -> Vec<String> {
        self.installed().clone()
    }

    /// Claim a plugin name; `false` when it is already installed
    pub(crate) fn mark_installed(&self, plugin: &str) -> bool {
        let mut installed = self.installed();
        if installed.iter().any(|p| p == plugin) {
            return false;
        }
        installed.push(plugin.to_string());
        true
    }

    pub(crate) fn unmark_installed(&self, plugin: &str) {
        self.installed().retain(|p| p != plugin);
    }

    /// Terminate every worker. Plugin handles stay valid and become no-ops
    /// for the dropped registrations.
    pub fn shutdown(&self) {
        self.workers.shutdown_all();
        tracing::info!("Editor engine shut down");
    }

    fn installed(&self) -> MutexGuard<'_, Vec<String>> {
        match self.installed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("base_worker_path", &self.workers.base_worker_path())
            .field("workers", &self.workers.len())
            .field("theme", &self.themes.current())
            .field("installed", &self.installed_plugins())
            .finish()
    }
}
