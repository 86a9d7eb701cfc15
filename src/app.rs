//! Application container for monaco-kit

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::OutputContext;
use crate::config;
use crate::models::config::KitConfig;
use crate::services::config::{ConfigService, DefaultConfigService};
use crate::services::engine::{BundledEngineSource, EngineSlot};
use crate::services::plugins::{PluginRegistry, RegistryPolicy};
use crate::services::session::SessionContext;

pub struct App {
    root: PathBuf,
    pub(crate) output: OutputContext,
    pub(crate) config_service: Arc<dyn ConfigService>,
    pub(crate) config: KitConfig,
}

impl App {
    pub async fn new() -> anyhow::Result<Self> {
        let root = std::env::current_dir()?;

        tracing::debug!("Initializing monaco-kit at {:?}", root);

        let output = OutputContext::new(root.clone());
        let config_service = Arc::new(DefaultConfigService::new(&root));
        let config = match config_service.load(false).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Falling back to default configuration: {}", e);
                KitConfig::default()
            }
        };

        config::init(&config);

        Ok(Self {
            root,
            output,
            config_service,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &KitConfig {
        &self.config
    }

    /// Registry of builtin plugins under `policy`, defaulting to the
    /// configured loader settings
    pub fn registry(&self, policy: Option<RegistryPolicy>) -> Arc<PluginRegistry> {
        let policy = policy.unwrap_or_else(|| RegistryPolicy::from(&self.config.loader));
        Arc::new(PluginRegistry::with_builtins().with_policy(policy))
    }

    /// Session context over a fresh slot and the bundled engine
    pub fn session_context(&self, policy: Option<RegistryPolicy>) -> SessionContext {
        SessionContext::new(
            EngineSlot::new(),
            Arc::new(BundledEngineSource),
            self.registry(policy),
        )
    }
}
