//! Plugin descriptors and installation
//!
//! A plugin is a named, one-shot install routine run against an engine. The
//! [`PluginRegistry`] turns requested ids into plugins and orders them by
//! their declared dependencies; [`PluginHost`] installs them.

pub mod builtin;
pub mod languages;
pub mod registry;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

pub use registry::{PluginFactory, PluginRegistry, RegistryPolicy};

use super::engine::Engine;
use crate::error::PluginError;
use crate::infra::{Disposable, DisposableStore};
use crate::models::config::PluginSpec;

type InstallFn =
    Box<dyn FnOnce(Arc<Engine>) -> BoxFuture<'static, Result<Disposable, PluginError>> + Send>;

pub struct Plugin {
    name: String,
    dependencies: Vec<String>,
    install: InstallFn,
}

impl Plugin {
    pub fn new<F, Fut>(name: impl Into<String>, install: F) -> Self
    where
        F: FnOnce(Arc<Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Disposable, PluginError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            install: Box::new(move |engine| Box::pin(install(engine))),
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    async fn install(self, engine: Arc<Engine>) -> Result<Disposable, PluginError> {
        (self.install)(engine).await
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A plugin as callers ask for it
#[derive(Debug)]
pub enum PluginRequest {
    Id(String),
    WithConfig(String, Value),
    Plugin(Plugin),
}

impl PluginRequest {
    /// Registry id, when the request goes through the registry
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(id) | Self::WithConfig(id, _) => Some(id),
            Self::Plugin(_) => None,
        }
    }
}

impl From<&str> for PluginRequest {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for PluginRequest {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<(&str, Value)> for PluginRequest {
    fn from((id, config): (&str, Value)) -> Self {
        Self::WithConfig(id.to_string(), config)
    }
}

impl From<Plugin> for PluginRequest {
    fn from(plugin: Plugin) -> Self {
        Self::Plugin(plugin)
    }
}

impl From<PluginSpec> for PluginRequest {
    fn from(spec: PluginSpec) -> Self {
        match spec {
            PluginSpec::Id(id) => Self::Id(id),
            PluginSpec::Configured { id, config } if config.is_null() => Self::Id(id),
            PluginSpec::Configured { id, config } => Self::WithConfig(id, config),
        }
    }
}

pub struct PluginHost;

impl PluginHost {
    /// Install plugins in order, skipping names the engine already has.
    ///
    /// Each install's handle lands in `store`; releasing it uninstalls the
    /// plugin and frees its name. The first failure stops the run; plugins
    /// installed before it stay installed. Returns the names installed by
    /// this call.
    pub async fn install_all(
        engine: &Arc<Engine>,
        plugins: Vec<Plugin>,
        store: &DisposableStore,
    ) -> Result<Vec<String>, PluginError> {
        let mut installed = Vec::new();

        for plugin in plugins {
            let name = plugin.name().to_string();
            if !engine.mark_installed(&name) {
                tracing::debug!("Plugin '{}' already installed, skipping", name);
                continue;
            }

            match plugin.install(Arc::clone(engine)).await {
                Ok(handle) => {
                    let owner = Arc::downgrade(engine);
                    let released = name.clone();
                    store.push(Disposable::new(move || {
                        handle.dispose();
                        if let Some(engine) = owner.upgrade() {
                            engine.unmark_installed(&released);
                        }
                    }));
                    tracing::debug!("Plugin '{}' installed", name);
                    installed.push(name);
                }
                Err(e) => {
                    engine.unmark_installed(&name);
                    tracing::warn!("Plugin '{}' failed to install: {}", name, e);
                    return Err(match e {
                        PluginError::InstallFailed { .. } => e,
                        other => PluginError::install_failed(name, other),
                    });
                }
            }
        }

        Ok(installed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Plugin that records install and release into a shared log
    pub(crate) fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Plugin {
        let log = Arc::clone(log);
        let label = name.to_string();
        Plugin::new(name, move |_engine| async move {
            log.lock().unwrap().push(format!("install {}", label));
            let log = Arc::clone(&log);
            Ok(Disposable::new(move || {
                log.lock().unwrap().push(format!("dispose {}", label));
            }))
        })
    }

    fn failing(name: &str) -> Plugin {
        Plugin::new(name, |_engine| async {
            Err(PluginError::invalid_config("broken", "schema uri unreachable"))
        })
    }

    #[tokio::test]
    async fn test_install_all_and_reverse_release() {
        let engine = Arc::new(Engine::new("workers"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = DisposableStore::new();

        let names = PluginHost::install_all(
            &engine,
            vec![recording("a", &log), recording("b", &log), recording("c", &log)],
            &store,
        )
        .await
        .unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(engine.installed_plugins(), vec!["a", "b", "c"]);

        store.dispose();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "install a",
                "install b",
                "install c",
                "dispose c",
                "dispose b",
                "dispose a"
            ]
        );
        assert!(engine.installed_plugins().is_empty());
    }

    #[tokio::test]
    async fn test_already_installed_names_are_skipped() {
        let engine = Arc::new(Engine::new("workers"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = DisposableStore::new();
        let second = DisposableStore::new();

        PluginHost::install_all(&engine, vec![recording("a", &log)], &first)
            .await
            .unwrap();
        let names = PluginHost::install_all(
            &engine,
            vec![recording("a", &log), recording("b", &log)],
            &second,
        )
        .await
        .unwrap();

        assert_eq!(names, vec!["b"]);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_keeps_earlier_installs() {
        let engine = Arc::new(Engine::new("workers"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = DisposableStore::new();

        let err = PluginHost::install_all(
            &engine,
            vec![recording("a", &log), failing("broken"), recording("c", &log)],
            &store,
        )
        .await
        .unwrap_err();

        match err {
            PluginError::InstallFailed { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("schema uri unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.installed_plugins(), vec!["a"]);
        assert_eq!(store.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["install a"]);
    }

    #[test]
    fn test_request_from_spec() {
        let spec = PluginSpec::Configured {
            id: "graphql".into(),
            config: serde_json::json!({ "uri": "/graphql" }),
        };
        let request = PluginRequest::from(spec);
        assert_eq!(request.id(), Some("graphql"));
        assert!(matches!(request, PluginRequest::WithConfig(_, _)));

        let bare = PluginRequest::from(PluginSpec::Configured {
            id: "typings".into(),
            config: Value::Null,
        });
        assert!(matches!(bare, PluginRequest::Id(id) if id == "typings"));
    }
}
