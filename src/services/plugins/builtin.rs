//! Builtin plugins
//!
//! Formatting, type acquisition, GraphQL schema awareness, theming, keyboard
//! shortcuts and worker path configuration.

use serde_json::{Value, json};

use super::{Plugin, PluginRegistry};
use crate::error::PluginError;
use crate::infra::Disposable;
use crate::models::providers::Capability;
use crate::models::theme::ThemeMap;
use crate::services::engine::Keybinding;
use crate::services::workers::{WorkerRegistration, WorkerSource};

pub const CORE_WORKER: &str = "core.worker";

const PRETTIER_LANGUAGES: [&str; 8] = [
    "javascript",
    "typescript",
    "graphql",
    "css",
    "html",
    "markdown",
    "yaml",
    "json",
];

const DEFAULT_SHORTCUTS: [(&str, &str); 7] = [
    ("shift+alt+f", "editor.action.formatDocument"),
    ("ctrl+k ctrl+f", "editor.action.formatSelection"),
    ("ctrl+/", "editor.action.commentLine"),
    ("ctrl+d", "editor.action.addSelectionToNextFindMatch"),
    ("alt+up", "editor.action.moveLinesUpAction"),
    ("alt+down", "editor.action.moveLinesDownAction"),
    ("ctrl+shift+k", "editor.action.deleteLines"),
];

type Factory = fn(Option<&Value>) -> Result<Plugin, PluginError>;

const BUILTINS: [(&str, Factory); 6] = [
    (CORE_WORKER, core_worker),
    ("prettier", prettier),
    ("typings", typings),
    ("graphql", graphql),
    ("theme", theme),
    ("shortcuts", shortcuts),
];

pub fn register_all(registry: &mut PluginRegistry) {
    for (id, factory) in BUILTINS {
        if let Err(e) = registry.register(id, factory) {
            tracing::warn!("Builtin plugin '{}' not registered: {}", id, e);
        }
    }
    if let Err(e) = registry.alias("worker", CORE_WORKER) {
        tracing::warn!("Builtin alias 'worker' not registered: {}", e);
    }
}

/// Executable name of a builtin worker
pub fn worker_script(label: &str) -> String {
    format!("{}.monaco.worker", label)
}

/// `core.worker`: optionally points the engine at another worker directory.
/// Config: `"path"` or `{ "path": "..." }`.
pub fn core_worker(config: Option<&Value>) -> Result<Plugin, PluginError> {
    let path = match config {
        None | Some(Value::Null) => None,
        Some(Value::String(path)) => Some(path.clone()),
        Some(Value::Object(map)) => match map.get("path") {
            None | Some(Value::Null) => None,
            Some(Value::String(path)) => Some(path.clone()),
            Some(_) => {
                return Err(PluginError::invalid_config(CORE_WORKER, "path must be a string"));
            }
        },
        Some(_) => {
            return Err(PluginError::invalid_config(
                CORE_WORKER,
                "expected a path or { path }",
            ));
        }
    };

    Ok(Plugin::new(CORE_WORKER, move |engine| async move {
        let Some(path) = path else {
            return Ok(Disposable::none());
        };
        let workers = engine.workers().clone();
        let previous = workers.set_base_worker_path(path.clone());
        tracing::debug!("Worker path set to '{}'", path);
        Ok(Disposable::new(move || {
            workers.set_base_worker_path(previous);
        }))
    }))
}

/// `prettier`: document formatting. Config: list of language ids.
pub fn prettier(config: Option<&Value>) -> Result<Plugin, PluginError> {
    let languages = match config {
        None | Some(Value::Null) => PRETTIER_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        Some(value) => string_list("prettier", value)?,
    };

    let source = WorkerSource::script(worker_script("prettier"));
    let registration = WorkerRegistration::new("prettier", source)
        .languages(languages.clone())
        .options(json!({ "languages": languages }))
        .provides(Capability::DocumentFormattingEdit);

    Ok(worker_plugin("prettier", registration).depends_on([CORE_WORKER]))
}

/// `typings`: type acquisition and diagnostics for TypeScript and JavaScript.
/// Config is forwarded to the worker as its options.
pub fn typings(config: Option<&Value>) -> Result<Plugin, PluginError> {
    let options = match config {
        None => Value::Null,
        Some(value) if value.is_null() || value.is_object() => value.clone(),
        Some(_) => return Err(PluginError::invalid_config("typings", "expected an object")),
    };

    let source = WorkerSource::script(worker_script("typings"));
    let registration = WorkerRegistration::new("typings", source)
        .languages(["typescript", "javascript"])
        .options(options)
        .provides(Capability::Diagnostics);

    Ok(worker_plugin("typings", registration).depends_on([CORE_WORKER]))
}

/// `graphql`: schema-aware GraphQL support. Config: `{ "uri": "..." }` or the
/// uri itself.
pub fn graphql(config: Option<&Value>) -> Result<Plugin, PluginError> {
    let uri = match config {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(uri)) => Value::String(uri.clone()),
        Some(Value::Object(map)) => map.get("uri").cloned().unwrap_or(Value::Null),
        Some(_) => return Err(PluginError::invalid_config("graphql", "expected { uri }")),
    };

    let source = WorkerSource::script(worker_script("graphql"));
    let registration = WorkerRegistration::new("graphql", source)
        .language("graphql")
        .options(json!({
            "languageConfig": {
                "schemaConfig": { "uri": uri },
            },
        }))
        .provides(Capability::Hover)
        .provides(Capability::DocumentFormattingEdit)
        .provides(Capability::CompletionItem)
        .provides(Capability::Diagnostics);

    Ok(worker_plugin("graphql", registration).depends_on([CORE_WORKER]))
}

/// `theme`: defines a map of named themes
pub fn theme(config: Option<&Value>) -> Result<Plugin, PluginError> {
    let themes: ThemeMap = match config {
        None | Some(Value::Null) => ThemeMap::new(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| PluginError::invalid_config("theme", e))?,
    };

    Ok(Plugin::new("theme", move |engine| async move {
        engine.themes().define_themes(&themes);
        Ok(Disposable::none())
    }))
}

/// `shortcuts`: default editor keybindings. Config: `{ "<key>": "<command>" }`
/// entries that extend or override the defaults.
pub fn shortcuts(config: Option<&Value>) -> Result<Plugin, PluginError> {
    let mut bindings: Vec<Keybinding> = DEFAULT_SHORTCUTS
        .iter()
        .map(|(key, command)| Keybinding::new(*key, *command))
        .collect();

    match config {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, command) in map {
                let command = command.as_str().ok_or_else(|| {
                    PluginError::invalid_config(
                        "shortcuts",
                        format!("command for '{}' must be a string", key),
                    )
                })?;
                bindings.push(Keybinding::new(key.clone(), command));
            }
        }
        Some(_) => {
            return Err(PluginError::invalid_config(
                "shortcuts",
                "expected a map of key to command",
            ));
        }
    }

    Ok(Plugin::new("shortcuts", move |engine| async move {
        Ok(engine.keybindings().add(bindings))
    }))
}

fn worker_plugin(name: &'static str, registration: WorkerRegistration) -> Plugin {
    Plugin::new(name, move |engine| async move {
        engine
            .workers()
            .register(registration)
            .map_err(|e| PluginError::install_failed(name, e))
    })
}

fn string_list(plugin: &str, value: &Value) -> Result<Vec<String>, PluginError> {
    let items = value
        .as_array()
        .ok_or_else(|| PluginError::invalid_config(plugin, "expected a list of language ids"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| PluginError::invalid_config(plugin, "language ids must be strings"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::DisposableStore;
    use crate::services::engine::Engine;
    use crate::services::plugins::PluginHost;
    use std::sync::Arc;

    async fn install(plugin: Plugin) -> (Arc<Engine>, DisposableStore) {
        let engine = Arc::new(Engine::new("public/workers"));
        let store = DisposableStore::new();
        PluginHost::install_all(&engine, vec![plugin], &store)
            .await
            .unwrap();
        (engine, store)
    }

    #[test]
    fn test_builtin_ids() {
        let registry = PluginRegistry::with_builtins();
        let ids = ["core.worker", "worker", "prettier", "typings", "graphql", "theme", "shortcuts"];
        for id in ids {
            assert!(registry.contains(id), "missing {id}");
        }
        let plugin = registry.create("worker", None).unwrap().unwrap();
        assert_eq!(plugin.name(), CORE_WORKER);
    }

    #[tokio::test]
    async fn test_prettier_registers_formatter_for_configured_languages() {
        let plugin = prettier(Some(&json!(["typescript"]))).unwrap();
        assert_eq!(plugin.dependencies(), [CORE_WORKER.to_string()]);

        let (engine, store) = install(plugin).await;
        let workers = engine.workers();
        assert!(workers.has_capability("typescript", Capability::DocumentFormattingEdit));
        assert!(!workers.has_capability("css", Capability::DocumentFormattingEdit));
        assert_eq!(workers.workers()[0].label, "prettier");

        store.dispose();
        assert!(workers.is_empty());
    }

    #[test]
    fn test_prettier_rejects_bad_config() {
        let err = prettier(Some(&json!("typescript"))).unwrap_err();
        assert!(matches!(err, PluginError::InvalidConfig { plugin, .. } if plugin == "prettier"));
        assert!(prettier(Some(&json!([1, 2]))).is_err());
    }

    #[tokio::test]
    async fn test_graphql_capabilities() {
        let (engine, _store) = install(graphql(Some(&json!({ "uri": "/graphql" }))).unwrap()).await;
        let caps = engine.workers().capabilities("graphql");
        assert!(caps.hover && caps.completion_item && caps.diagnostics);
        assert!(caps.document_formatting_edit);
        assert!(!caps.definition);
    }

    #[tokio::test]
    async fn test_core_worker_path_restored_on_release() {
        let plugin = core_worker(Some(&json!({ "path": "/cdn/workers" }))).unwrap();
        let (engine, store) = install(plugin).await;
        assert_eq!(engine.workers().base_worker_path(), "/cdn/workers");
        store.dispose();
        assert_eq!(engine.workers().base_worker_path(), "public/workers");

        assert!(core_worker(Some(&json!(42))).is_err());
    }

    #[tokio::test]
    async fn test_shortcuts_override_defaults() {
        let plugin = shortcuts(Some(&json!({ "shift+alt+f": "custom.format" }))).unwrap();
        let (engine, store) = install(plugin).await;
        assert_eq!(
            engine.keybindings().command_for("shift+alt+f").as_deref(),
            Some("custom.format")
        );
        assert_eq!(
            engine.keybindings().command_for("ctrl+/").as_deref(),
            Some("editor.action.commentLine")
        );
        store.dispose();
        assert!(engine.keybindings().bindings().is_empty());
    }

    #[tokio::test]
    async fn test_theme_plugin_defines_themes() {
        let config = json!({
            "night-owl": { "base": "vs-dark", "colors": { "editor.background": "#011627" } }
        });
        let (engine, _store) = install(theme(Some(&config)).unwrap()).await;
        assert!(engine.themes().is_defined("night-owl"));
        assert!(engine.themes().set_theme("night-owl"));
    }
}
