//! Editor-side tables owned by an engine: registered languages and keybindings

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::infra::Disposable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageDefinition {
    pub id: String,
    pub extensions: Vec<String>,
    pub aliases: Vec<String>,
    /// Path of the tokenizer grammar, relative to the engine assets
    pub grammar: String,
}

impl LanguageDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            grammar: format!("languages/{}.basic.js", id),
            id,
            extensions: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Languages known to the engine, in registration order
#[derive(Default)]
pub struct LanguageRegistry {
    entries: Arc<Mutex<Vec<LanguageDefinition>>>,
}

impl LanguageRegistry {
    /// Register a language. Registering an id twice replaces the definition;
    /// releasing the returned handle removes it.
    pub fn register(&self, definition: LanguageDefinition) -> Disposable {
        let id = definition.id.clone();
        {
            let mut entries = lock(&self.entries);
            entries.retain(|d| d.id != id);
            entries.push(definition);
        }
        tracing::debug!("Language '{}' registered", id);

        let entries = Arc::downgrade(&self.entries);
        Disposable::new(move || {
            if let Some(entries) = entries.upgrade() {
                lock(&entries).retain(|d| d.id != id);
            }
        })
    }

    pub fn get(&self, id: &str) -> Option<LanguageDefinition> {
        lock(&self.entries).iter().find(|d| d.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.entries).iter().any(|d| d.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.entries).iter().map(|d| d.id.clone()).collect()
    }

    /// Language claiming a file extension (with leading dot)
    pub fn for_extension(&self, extension: &str) -> Option<String> {
        lock(&self.entries)
            .iter()
            .find(|d| d.extensions.iter().any(|e| e.eq_ignore_ascii_case(extension)))
            .map(|d| d.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keybinding {
    pub key: String,
    pub command: String,
}

impl Keybinding {
    pub fn new(key: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            command: command.into(),
        }
    }
}

#[derive(Default)]
pub struct KeybindingTable {
    bindings: Arc<Mutex<Vec<(u64, Keybinding)>>>,
    next_id: Mutex<u64>,
}

impl KeybindingTable {
    /// Add a batch of bindings; later bindings for the same key win
    pub fn add(&self, bindings: Vec<Keybinding>) -> Disposable {
        let id = {
            let mut next = lock(&self.next_id);
            *next += 1;
            *next
        };
        lock(&self.bindings).extend(bindings.into_iter().map(|b| (id, b)));

        let table = Arc::downgrade(&self.bindings);
        Disposable::new(move || {
            if let Some(table) = table.upgrade() {
                lock(&table).retain(|(batch, _)| *batch != id);
            }
        })
    }

    pub fn command_for(&self, key: &str) -> Option<String> {
        lock(&self.bindings)
            .iter()
            .rev()
            .find(|(_, b)| b.key == key)
            .map(|(_, b)| b.command.clone())
    }

    pub fn bindings(&self) -> Vec<Keybinding> {
        lock(&self.bindings).iter().map(|(_, b)| b.clone()).collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_register_and_release() {
        let languages = LanguageRegistry::default();
        let handle = languages.register(
            LanguageDefinition::new("razor")
                .extensions(&[".cshtml"])
                .aliases(&["Razor"]),
        );

        let def = languages.get("razor").unwrap();
        assert_eq!(def.grammar, "languages/razor.basic.js");
        assert_eq!(languages.for_extension(".CSHTML").as_deref(), Some("razor"));

        handle.dispose();
        assert!(!languages.contains("razor"));
    }

    #[test]
    fn test_keybinding_batches() {
        let table = KeybindingTable::default();
        let defaults = table.add(vec![Keybinding::new("ctrl+s", "save")]);
        let overrides = table.add(vec![Keybinding::new("ctrl+s", "format-and-save")]);

        assert_eq!(table.command_for("ctrl+s").as_deref(), Some("format-and-save"));
        overrides.dispose();
        assert_eq!(table.command_for("ctrl+s").as_deref(), Some("save"));
        defaults.dispose();
        assert!(table.bindings().is_empty());
    }
}
