//! Plugin registry
//!
//! Maps plugin ids to factories. Ids are validated when registered; requested
//! ids are resolved into plugins and ordered so that dependencies install
//! first.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::{Plugin, PluginRequest, builtin, languages};
use crate::error::PluginError;
use crate::models::config::{DependencyMode, LoaderSettings, UnknownPluginPolicy};

/// Builds a plugin from its optional config
pub trait PluginFactory: Send + Sync {
    fn create(&self, config: Option<&Value>) -> Result<Plugin, PluginError>;
}

impl<F> PluginFactory for F
where
    F: Fn(Option<&Value>) -> Result<Plugin, PluginError> + Send + Sync,
{
    fn create(&self, config: Option<&Value>) -> Result<Plugin, PluginError> {
        self(config)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryPolicy {
    pub unknown: UnknownPluginPolicy,
    pub dependencies: DependencyMode,
}

impl RegistryPolicy {
    pub fn strict() -> Self {
        Self {
            unknown: UnknownPluginPolicy::Reject,
            dependencies: DependencyMode::Strict,
        }
    }
}

impl From<&LoaderSettings> for RegistryPolicy {
    fn from(settings: &LoaderSettings) -> Self {
        Self {
            unknown: settings.unknown_plugins,
            dependencies: settings.dependencies,
        }
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
    aliases: BTreeMap<String, String>,
    policy: RegistryPolicy,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every builtin plugin and basic language
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        languages::register_all(&mut registry);
        registry
    }

    pub fn with_policy(mut self, policy: RegistryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RegistryPolicy {
        self.policy
    }

    pub fn register(
        &mut self,
        id: impl Into<String>,
        factory: impl PluginFactory + 'static,
    ) -> Result<(), PluginError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PluginError::InvalidId);
        }
        if self.contains(&id) {
            return Err(PluginError::DuplicateId(id));
        }
        self.factories.insert(id, Arc::new(factory));
        Ok(())
    }

    /// Second id for an already registered plugin
    pub fn alias(&mut self, alias: impl Into<String>, id: &str) -> Result<(), PluginError> {
        let alias = alias.into();
        if alias.trim().is_empty() {
            return Err(PluginError::InvalidId);
        }
        if self.contains(&alias) {
            return Err(PluginError::DuplicateId(alias));
        }
        if !self.factories.contains_key(id) {
            return Err(PluginError::UnknownPlugin(id.to_string()));
        }
        self.aliases.insert(alias, id.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id) || self.aliases.contains_key(id)
    }

    /// Registered ids in sorted order, aliases excluded
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, id)| (a.as_str(), id.as_str()))
    }

    /// Build one plugin; `None` for unknown ids under the lenient policy
    pub fn create(&self, id: &str, config: Option<&Value>) -> Result<Option<Plugin>, PluginError> {
        let key = self.aliases.get(id).map(String::as_str).unwrap_or(id);
        match self.factories.get(key) {
            Some(factory) => factory.create(config).map(Some),
            None => match self.policy.unknown {
                UnknownPluginPolicy::Ignore => {
                    tracing::debug!("Unknown plugin '{}' ignored", id);
                    Ok(None)
                }
                UnknownPluginPolicy::Reject => Err(PluginError::UnknownPlugin(id.to_string())),
            },
        }
    }

    /// Turn requests into plugins, in request order. Duplicate names keep the
    /// first occurrence.
    pub fn resolve<I>(&self, requests: I) -> Result<Vec<Plugin>, PluginError>
    where
        I: IntoIterator<Item = PluginRequest>,
    {
        let mut plugins: Vec<Plugin> = Vec::new();
        for request in requests {
            let plugin = match request {
                PluginRequest::Id(id) => self.create(&id, None)?,
                PluginRequest::WithConfig(id, config) => self.create(&id, Some(&config))?,
                PluginRequest::Plugin(plugin) => Some(plugin),
            };
            let Some(plugin) = plugin else { continue };

            if plugins.iter().any(|p| p.name() == plugin.name()) {
                tracing::warn!("Plugin '{}' requested twice, keeping the first", plugin.name());
                continue;
            }
            plugins.push(plugin);
        }
        Ok(plugins)
    }

    /// Order plugins so every dependency present in the set comes first.
    ///
    /// Deterministic: each step emits the earliest remaining plugin (in input
    /// order) whose present dependencies are all emitted.
    pub fn order(&self, plugins: Vec<Plugin>) -> Result<Vec<Plugin>, PluginError> {
        let present: HashSet<String> = plugins.iter().map(|p| p.name().to_string()).collect();
        let strict = self.policy.dependencies == DependencyMode::Strict;

        for plugin in &plugins {
            for dependency in plugin.dependencies() {
                if present.contains(dependency) {
                    continue;
                }
                if strict {
                    return Err(PluginError::MissingDependency {
                        plugin: plugin.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
                tracing::debug!(
                    "Plugin '{}' depends on '{}', which was not requested",
                    plugin.name(),
                    dependency
                );
            }
        }

        let mut remaining = plugins;
        let mut emitted: HashSet<String> = HashSet::new();
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let next = remaining.iter().position(|p| {
                p.dependencies()
                    .iter()
                    .all(|d| emitted.contains(d) || !present.contains(d))
            });

            let index = match next {
                Some(index) => index,
                None => {
                    let cycle = find_cycle(&remaining);
                    if strict {
                        return Err(PluginError::DependencyCycle(cycle));
                    }
                    tracing::warn!(
                        "Dependency cycle between plugins: {}, installing '{}' first",
                        cycle.join(" -> "),
                        remaining[0].name()
                    );
                    0
                }
            };

            let plugin = remaining.remove(index);
            emitted.insert(plugin.name().to_string());
            ordered.push(plugin);
        }

        Ok(ordered)
    }

    pub fn resolve_ordered<I>(&self, requests: I) -> Result<Vec<Plugin>, PluginError>
    where
        I: IntoIterator<Item = PluginRequest>,
    {
        let plugins = self.resolve(requests)?;
        self.order(plugins)
    }
}

/// Walk unmet dependencies from the first remaining plugin until a name repeats
fn find_cycle(remaining: &[Plugin]) -> Vec<String> {
    let Some(start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<String> = vec![start.name().to_string()];
    let mut current = start;
    loop {
        let next = current
            .dependencies()
            .iter()
            .find_map(|d| remaining.iter().find(|p| p.name() == d));
        let Some(next) = next else {
            return path;
        };

        let name = next.name().to_string();
        if let Some(pos) = path.iter().position(|p| *p == name) {
            let mut cycle = path.split_off(pos);
            cycle.push(name);
            return cycle;
        }
        path.push(name);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Disposable;

    fn plugin(name: &str, deps: &[&str]) -> Plugin {
        Plugin::new(name, |_engine| async { Ok(Disposable::none()) })
            .depends_on(deps.iter().copied())
    }

    fn names(plugins: &[Plugin]) -> Vec<&str> {
        plugins.iter().map(Plugin::name).collect()
    }

    fn registry_with(ids: &[&'static str]) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for &id in ids {
            registry
                .register(id, move |_config: Option<&Value>| {
                    Ok::<_, PluginError>(plugin(id, &[]))
                })
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_dependency_order() {
        let registry = PluginRegistry::new();
        let ordered = registry
            .order(vec![plugin("C", &["B"]), plugin("A", &[]), plugin("B", &["A"])])
            .unwrap();
        assert_eq!(names(&ordered), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_order_keeps_request_order_among_independents() {
        let registry = PluginRegistry::new();
        let ordered = registry
            .order(vec![
                plugin("typings", &["core.worker"]),
                plugin("theme", &[]),
                plugin("core.worker", &[]),
            ])
            .unwrap();
        assert_eq!(names(&ordered), vec!["theme", "core.worker", "typings"]);
    }

    #[test]
    fn test_missing_dependency_advisory_vs_strict() {
        let lenient = PluginRegistry::new();
        let ordered = lenient.order(vec![plugin("prettier", &["core.worker"])]).unwrap();
        assert_eq!(names(&ordered), vec!["prettier"]);

        let strict = PluginRegistry::new().with_policy(RegistryPolicy::strict());
        let err = strict
            .order(vec![plugin("prettier", &["core.worker"])])
            .unwrap_err();
        assert_eq!(
            err,
            PluginError::MissingDependency {
                plugin: "prettier".into(),
                dependency: "core.worker".into()
            }
        );
    }

    #[test]
    fn test_cycles() {
        let cyclic = || vec![plugin("x", &[]), plugin("a", &["b"]), plugin("b", &["a"])];

        let ordered = PluginRegistry::new().order(cyclic()).unwrap();
        assert_eq!(names(&ordered), vec!["x", "a", "b"]);

        let err = PluginRegistry::new()
            .with_policy(RegistryPolicy::strict())
            .order(cyclic())
            .unwrap_err();
        assert_eq!(
            err,
            PluginError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()])
        );
    }

    #[test]
    fn test_unknown_plugin_tolerance() {
        let registry = registry_with(&["typings"]);
        let resolved = registry
            .resolve(vec![
                PluginRequest::from("nonexistent"),
                PluginRequest::from("typings"),
            ])
            .unwrap();
        assert_eq!(names(&resolved), vec!["typings"]);

        let strict = registry_with(&["typings"]).with_policy(RegistryPolicy {
            unknown: UnknownPluginPolicy::Reject,
            dependencies: DependencyMode::Advisory,
        });
        let err = strict
            .resolve(vec![PluginRequest::from("nonexistent")])
            .unwrap_err();
        assert_eq!(err, PluginError::UnknownPlugin("nonexistent".into()));
    }

    #[test]
    fn test_registration_validation() {
        let mut registry = registry_with(&["prettier"]);
        let factory = |_: Option<&Value>| Ok::<_, PluginError>(plugin("other", &[]));

        assert_eq!(registry.register("", factory), Err(PluginError::InvalidId));
        assert_eq!(
            registry.register("prettier", factory),
            Err(PluginError::DuplicateId("prettier".into()))
        );
        assert!(registry.alias("format", "prettier").is_ok());
        assert_eq!(
            registry.alias("format", "prettier"),
            Err(PluginError::DuplicateId("format".into()))
        );
        assert!(registry.alias("x", "missing").is_err());

        let resolved = registry.resolve(vec![PluginRequest::from("format")]).unwrap();
        assert_eq!(names(&resolved), vec!["prettier"]);
    }

    #[test]
    fn test_duplicate_requests_keep_first() {
        let registry = registry_with(&["typings"]);
        let resolved = registry
            .resolve(vec![
                PluginRequest::from(plugin("typings", &["custom"])),
                PluginRequest::from("typings"),
            ])
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].dependencies(), ["custom".to_string()]);
    }
}
