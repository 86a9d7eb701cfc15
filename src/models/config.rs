//! Configuration model for monaco-kit
//!
//! Mirrors the options a host passes when mounting an editor session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::theme::ThemeMap;

/// monaco-kit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KitConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    /// Plugins to install, by registry id, optionally with config
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,

    /// Basic language definitions to install
    #[serde(default = "defaults::languages")]
    pub languages: Vec<String>,

    /// Active theme name
    #[serde(default)]
    pub theme: Option<String>,

    /// Extra theme definitions, by name
    #[serde(default)]
    pub themes: ThemeMap,

    /// Default options handed to every editor instance
    #[serde(default = "defaults::editor")]
    pub editor: Value,

    #[serde(default)]
    pub loader: LoaderSettings,

    #[serde(default)]
    pub workers: WorkerSettings,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            plugins: Vec::new(),
            languages: defaults::languages(),
            theme: None,
            themes: ThemeMap::new(),
            editor: defaults::editor(),
            loader: LoaderSettings::default(),
            workers: WorkerSettings::default(),
        }
    }
}

mod defaults {
    use serde_json::{Value, json};

    pub fn languages() -> Vec<String> {
        ["javascript", "typescript", "html", "css", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn editor() -> Value {
        json!({
            "automaticLayout": true,
            "minimap": { "enabled": false },
        })
    }

    pub fn monaco_path() -> String {
        "node_modules/monaco-editor/min/vs".to_string()
    }

    pub fn workers_path() -> String {
        "public/workers".to_string()
    }

    pub fn timeout_secs() -> u64 {
        10
    }
}

/// Where the engine and worker scripts live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "defaults::monaco_path")]
    pub monaco: String,

    #[serde(default = "defaults::workers_path")]
    pub workers: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            monaco: defaults::monaco_path(),
            workers: defaults::workers_path(),
        }
    }
}

/// A requested plugin: bare id, or id plus opaque config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSpec {
    Id(String),
    Configured {
        id: String,
        #[serde(default)]
        config: Value,
    },
}

impl PluginSpec {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Configured { id, .. } => id,
        }
    }

    /// Parse CLI form `id` or `id=<json>`; non-JSON values become strings.
    pub fn parse(input: &str) -> Self {
        match input.split_once('=') {
            Some((id, raw)) => {
                let config =
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                Self::Configured {
                    id: id.trim().to_string(),
                    config,
                }
            }
            None => Self::Id(input.trim().to_string()),
        }
    }
}

/// What to do with plugin ids missing from the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPluginPolicy {
    #[default]
    Ignore,
    Reject,
}

/// How plugin dependency declarations are enforced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Ordering hints only; missing dependencies are not an error
    #[default]
    Advisory,
    /// Missing dependencies and cycles are errors
    Strict,
}

/// Whether unmounting a session also tears down the shared engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownPolicy {
    #[default]
    KeepEngine,
    DisposeEngine,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderSettings {
    #[serde(default)]
    pub unknown_plugins: UnknownPluginPolicy,

    #[serde(default)]
    pub dependencies: DependencyMode,

    #[serde(default)]
    pub teardown: TeardownPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Base request timeout; scaled per operation
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KitConfig::default();
        assert_eq!(
            config.languages,
            vec!["javascript", "typescript", "html", "css", "json"]
        );
        assert_eq!(config.editor["automaticLayout"], true);
        assert_eq!(config.editor["minimap"]["enabled"], false);
        assert_eq!(config.loader.unknown_plugins, UnknownPluginPolicy::Ignore);
        assert_eq!(config.loader.dependencies, DependencyMode::Advisory);
        assert_eq!(config.loader.teardown, TeardownPolicy::KeepEngine);
        assert_eq!(config.workers.timeout_secs, 10);
    }

    #[test]
    fn test_parse_toml_with_mixed_plugins() {
        let config: KitConfig = toml::from_str(
            r##"
            plugins = ["typings", { id = "prettier", config = ["typescript", "graphql"] }]
            theme = "night-owl"

            [paths]
            workers = "https://cdn.example.com/workers"

            [loader]
            dependencies = "strict"
            teardown = "dispose-engine"

            [themes.night-owl]
            base = "vs-dark"
            colors = { "editor.background" = "#011627" }
            "##,
        )
        .unwrap();

        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0], PluginSpec::Id("typings".into()));
        assert_eq!(config.plugins[1].id(), "prettier");
        assert_eq!(config.paths.workers, "https://cdn.example.com/workers");
        assert_eq!(config.paths.monaco, "node_modules/monaco-editor/min/vs");
        assert_eq!(config.loader.dependencies, DependencyMode::Strict);
        assert_eq!(config.loader.teardown, TeardownPolicy::DisposeEngine);
        assert_eq!(
            config.themes["night-owl"].colors["editor.background"],
            "#011627"
        );
        assert!(config.themes["night-owl"].inherit);
    }

    #[test]
    fn test_plugin_spec_parse() {
        assert_eq!(PluginSpec::parse("typings"), PluginSpec::Id("typings".into()));
        assert_eq!(
            PluginSpec::parse(r#"prettier=["typescript"]"#),
            PluginSpec::Configured {
                id: "prettier".into(),
                config: serde_json::json!(["typescript"]),
            }
        );
        assert_eq!(
            PluginSpec::parse("graphql=https://api.example.com/graphql"),
            PluginSpec::Configured {
                id: "graphql".into(),
                config: serde_json::json!("https://api.example.com/graphql"),
            }
        );
    }
}
