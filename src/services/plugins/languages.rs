//! Basic language definitions
//!
//! Tokenizer-only languages shipped with the engine assets. Each one is a
//! plugin named `language.<id>` that registers the definition on install.

use serde_json::Value;

use super::{Plugin, PluginRegistry, PluginRequest};
use crate::error::PluginError;
use crate::services::engine::LanguageDefinition;

pub const PLUGIN_PREFIX: &str = "language.";

pub const DEFAULT_LANGUAGES: [&str; 5] = ["javascript", "typescript", "html", "css", "json"];

struct BasicLanguage {
    id: &'static str,
    extensions: &'static [&'static str],
    aliases: &'static [&'static str],
}

const BASIC_LANGUAGES: &[BasicLanguage] = &[
    BasicLanguage {
        id: "javascript",
        extensions: &[".js", ".es6", ".jsx", ".mjs"],
        aliases: &["JavaScript", "javascript", "js"],
    },
    BasicLanguage {
        id: "typescript",
        extensions: &[".ts", ".tsx"],
        aliases: &["TypeScript", "ts", "typescript"],
    },
    BasicLanguage {
        id: "html",
        extensions: &[".html", ".htm", ".xhtml"],
        aliases: &["HTML", "htm", "html", "xhtml"],
    },
    BasicLanguage {
        id: "css",
        extensions: &[".css"],
        aliases: &["CSS", "css"],
    },
    BasicLanguage {
        id: "json",
        extensions: &[".json", ".jsonc", ".har"],
        aliases: &["JSON", "json"],
    },
    BasicLanguage {
        id: "less",
        extensions: &[".less"],
        aliases: &["Less", "less"],
    },
    BasicLanguage {
        id: "scss",
        extensions: &[".scss"],
        aliases: &["Sass", "sass", "scss"],
    },
    BasicLanguage {
        id: "graphql",
        extensions: &[".graphql", ".gql"],
        aliases: &["GraphQL", "graphql", "gql"],
    },
    BasicLanguage {
        id: "markdown",
        extensions: &[".md", ".markdown", ".mdown"],
        aliases: &["Markdown", "markdown"],
    },
    BasicLanguage {
        id: "yaml",
        extensions: &[".yaml", ".yml"],
        aliases: &["YAML", "yaml", "yml"],
    },
    BasicLanguage {
        id: "xml",
        extensions: &[".xml", ".xsd", ".svg"],
        aliases: &["XML", "xml"],
    },
    BasicLanguage {
        id: "python",
        extensions: &[".py", ".pyi"],
        aliases: &["Python", "py"],
    },
    BasicLanguage {
        id: "rust",
        extensions: &[".rs"],
        aliases: &["Rust", "rust"],
    },
    BasicLanguage {
        id: "go",
        extensions: &[".go"],
        aliases: &["Go"],
    },
    BasicLanguage {
        id: "java",
        extensions: &[".java", ".jav"],
        aliases: &["Java", "java"],
    },
    BasicLanguage {
        id: "sql",
        extensions: &[".sql"],
        aliases: &["SQL"],
    },
    BasicLanguage {
        id: "shell",
        extensions: &[".sh", ".bash"],
        aliases: &["Shell", "sh"],
    },
    BasicLanguage {
        id: "dockerfile",
        extensions: &[".dockerfile"],
        aliases: &["Dockerfile"],
    },
    BasicLanguage {
        id: "razor",
        extensions: &[".cshtml"],
        aliases: &["Razor", "razor"],
    },
    BasicLanguage {
        id: "lexon",
        extensions: &[".lex"],
        aliases: &["Lexon"],
    },
];

/// Definition of a basic language, if the engine ships one
pub fn definition(id: &str) -> Option<LanguageDefinition> {
    BASIC_LANGUAGES.iter().find(|l| l.id == id).map(|l| {
        LanguageDefinition::new(l.id)
            .extensions(l.extensions)
            .aliases(l.aliases)
    })
}

pub fn definitions() -> Vec<LanguageDefinition> {
    BASIC_LANGUAGES
        .iter()
        .filter_map(|l| definition(l.id))
        .collect()
}

pub fn plugin_id(language: &str) -> String {
    if language.starts_with(PLUGIN_PREFIX) {
        language.to_string()
    } else {
        format!("{}{}", PLUGIN_PREFIX, language)
    }
}

/// Map a language request onto its plugin id; ready-made plugins pass through
pub fn language_request(request: PluginRequest) -> PluginRequest {
    match request {
        PluginRequest::Id(id) => PluginRequest::Id(plugin_id(&id)),
        PluginRequest::WithConfig(id, config) => PluginRequest::WithConfig(plugin_id(&id), config),
        plugin @ PluginRequest::Plugin(_) => plugin,
    }
}

/// Plugin registering `definition`. Config may add `extensions` and `aliases`.
pub fn language_plugin(
    mut definition: LanguageDefinition,
    config: Option<&Value>,
) -> Result<Plugin, PluginError> {
    let name = plugin_id(&definition.id);
    if let Some(config) = config.filter(|c| !c.is_null()) {
        let object = config
            .as_object()
            .ok_or_else(|| PluginError::invalid_config(&name, "expected { extensions, aliases }"))?;
        for (key, target) in [
            ("extensions", &mut definition.extensions),
            ("aliases", &mut definition.aliases),
        ] {
            if let Some(values) = object.get(key).and_then(Value::as_array) {
                target.extend(values.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
    }

    Ok(Plugin::new(name, move |engine| async move {
        Ok(engine.languages().register(definition))
    }))
}

pub fn register_all(registry: &mut PluginRegistry) {
    for language in BASIC_LANGUAGES {
        let id = language.id;
        let result = registry.register(plugin_id(id), move |config: Option<&Value>| {
            let definition =
                definition(id).ok_or_else(|| PluginError::UnknownPlugin(plugin_id(id)))?;
            language_plugin(definition, config)
        });
        if let Err(e) = result {
            tracing::warn!("Language plugin '{}' not registered: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::DisposableStore;
    use crate::services::engine::Engine;
    use crate::services::plugins::PluginHost;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_defaults_are_registered() {
        let registry = PluginRegistry::with_builtins();
        for id in DEFAULT_LANGUAGES {
            assert!(registry.contains(&plugin_id(id)), "missing {id}");
        }
        assert!(registry.contains("language.razor"));
    }

    #[test]
    fn test_language_request_prefixing() {
        let request = language_request(PluginRequest::from("typescript"));
        assert_eq!(request.id(), Some("language.typescript"));

        let request = language_request(PluginRequest::from("language.css"));
        assert_eq!(request.id(), Some("language.css"));
    }

    #[tokio::test]
    async fn test_install_with_extra_extensions() {
        let registry = PluginRegistry::with_builtins();
        let plugins = registry
            .resolve(vec![language_request(PluginRequest::from((
                "typescript",
                json!({ "extensions": [".mts", ".cts"] }),
            )))])
            .unwrap();

        let engine = Arc::new(Engine::new("workers"));
        let store = DisposableStore::new();
        PluginHost::install_all(&engine, plugins, &store)
            .await
            .unwrap();

        let ts = engine.languages().get("typescript").unwrap();
        assert_eq!(ts.grammar, "languages/typescript.basic.js");
        assert_eq!(ts.extensions, vec![".ts", ".tsx", ".mts", ".cts"]);
        assert_eq!(engine.languages().for_extension(".mts").as_deref(), Some("typescript"));

        store.dispose();
        assert!(!engine.languages().contains("typescript"));
    }

    #[test]
    fn test_definitions_table() {
        let all = definitions();
        assert!(all.len() >= DEFAULT_LANGUAGES.len());
        assert!(definition("klingon").is_none());
    }
}
