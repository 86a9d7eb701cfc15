//! Theme table and active theme of an engine

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::infra::Disposable;
use crate::models::theme::{BUILTIN_THEMES, DEFAULT_THEME, ThemeData, ThemeMap, ThemeSelection};

/// Name under which inline or deferred theme data is defined
pub const INLINE_THEME: &str = "monaco-kit-inline";

pub type ThemeListener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, ThemeListener>,
}

pub struct ThemeService {
    defined: Mutex<ThemeMap>,
    current: Mutex<String>,
    listeners: Arc<Mutex<Listeners>>,
}

impl Default for ThemeService {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemeService {
    pub fn new() -> Self {
        Self {
            defined: Mutex::new(ThemeMap::new()),
            current: Mutex::new(DEFAULT_THEME.to_string()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn define_theme(&self, name: impl Into<String>, data: ThemeData) {
        let name = name.into();
        tracing::debug!("Theme '{}' defined (base: {})", name, data.base);
        lock(&self.defined).insert(name, data);
    }

    pub fn define_themes(&self, themes: &ThemeMap) {
        for (name, data) in themes {
            self.define_theme(name.clone(), data.clone());
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        BUILTIN_THEMES.contains(&name) || lock(&self.defined).contains_key(name)
    }

    pub fn theme(&self, name: &str) -> Option<ThemeData> {
        lock(&self.defined).get(name).cloned()
    }

    /// Builtin themes first, then defined ones in name order
    pub fn names(&self) -> Vec<String> {
        let defined = lock(&self.defined);
        BUILTIN_THEMES
            .iter()
            .map(|s| s.to_string())
            .chain(defined.keys().filter(|k| !BUILTIN_THEMES.contains(&k.as_str())).cloned())
            .collect()
    }

    pub fn current(&self) -> String {
        lock(&self.current).clone()
    }

    /// Switch the active theme. Unknown names are ignored and leave the current
    /// theme in place. Listeners fire only on an actual change.
    pub fn set_theme(&self, name: &str) -> bool {
        self.switch(name, false)
    }

    /// Apply a selection, resolving deferred data first. Replacing the data of
    /// the active inline theme counts as a change.
    pub async fn apply(&self, selection: &ThemeSelection) -> bool {
        match selection {
            ThemeSelection::Named(name) => self.set_theme(name),
            ThemeSelection::Data(data) => self.apply_inline(data.clone()),
            ThemeSelection::Deferred(resolve) => {
                let data = resolve().await;
                self.apply_inline(data)
            }
        }
    }

    fn apply_inline(&self, data: ThemeData) -> bool {
        let replaced = lock(&self.defined)
            .get(INLINE_THEME)
            .is_some_and(|previous| *previous != data);
        self.define_theme(INLINE_THEME, data);
        self.switch(INLINE_THEME, replaced)
    }

    fn switch(&self, name: &str, force: bool) -> bool {
        if !self.is_defined(name) {
            tracing::warn!("Unknown theme '{}', keeping '{}'", name, self.current());
            return false;
        }

        let changed = {
            let mut current = lock(&self.current);
            if *current == name && !force {
                false
            } else {
                *current = name.to_string();
                true
            }
        };

        if changed {
            tracing::debug!("Theme changed to '{}'", name);
            let listeners: Vec<ThemeListener> =
                lock(&self.listeners).entries.values().cloned().collect();
            for listener in listeners {
                listener(name);
            }
        }
        true
    }

    pub fn on_did_change_theme(
        &self,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> Disposable {
        let id = {
            let mut listeners = lock(&self.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.insert(id, Arc::new(listener));
            id
        };

        let listeners = Arc::downgrade(&self.listeners);
        Disposable::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                lock(&listeners).entries.remove(&id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
