//! Configuration service for monaco-kit

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::models::config::KitConfig;

pub const PROJECT_CONFIG_FILE: &str = "monaco-kit.toml";

#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn load(&self, global_only: bool) -> Result<KitConfig, ConfigError>;
    fn config_path(&self, global: bool) -> PathBuf;
    async fn init(&self, global: bool, force: bool) -> Result<PathBuf, ConfigError>;
}

pub struct DefaultConfigService {
    root: PathBuf,
    global_path: PathBuf,
}

impl DefaultConfigService {
    pub fn new(root: &Path) -> Self {
        Self::with_global_path(root, Self::global_config_path())
    }

    pub fn with_global_path(root: &Path, global_path: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            global_path,
        }
    }

    fn global_config_path() -> PathBuf {
        // XDG standard: ~/.config/monaco-kit/config.toml
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("monaco-kit")
            .join("config.toml")
    }

    fn project_config_path(&self) -> PathBuf {
        self.root.join(PROJECT_CONFIG_FILE)
    }

    async fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
        if !path.exists() {
            return Ok(toml::Table::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        content
            .parse::<toml::Table>()
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    async fn write_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let config = KitConfig::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigService for DefaultConfigService {
    async fn load(&self, global_only: bool) -> Result<KitConfig, ConfigError> {
        let mut table = Self::read_table(&self.global_path).await?;
        if !global_only {
            let project = Self::read_table(&self.project_config_path()).await?;
            merge_tables(&mut table, project);
        }

        let config: KitConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        if global_only {
            return Ok(config);
        }
        apply_env_overrides(config, |key| std::env::var(key).ok())
    }

    fn config_path(&self, global: bool) -> PathBuf {
        if global {
            self.global_path.clone()
        } else {
            self.project_config_path()
        }
    }

    async fn init(&self, global: bool, force: bool) -> Result<PathBuf, ConfigError> {
        let path = self.config_path(global);

        if path.exists() && !force {
            return Err(ConfigError::InvalidValue {
                key: "config".to_string(),
                message: format!(
                    "Config already exists: {}. Use --force to overwrite.",
                    path.display()
                ),
            });
        }

        Self::write_default_config(&path).await?;
        Ok(path)
    }
}

/// Project values win; nested tables merge key by key, arrays are replaced
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn apply_env_overrides(
    mut config: KitConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<KitConfig, ConfigError> {
    if let Some(val) = var("MONACO_KIT_WORKER_PATH") {
        config.paths.workers = val;
    }
    if let Some(val) = var("MONACO_KIT_THEME") {
        config.theme = Some(val);
    }
    if let Some(val) = var("MONACO_KIT_WORKER_TIMEOUT") {
        config.workers.timeout_secs = val.parse().map_err(|_| ConfigError::InvalidValue {
            key: "MONACO_KIT_WORKER_TIMEOUT".to_string(),
            message: format!("expected seconds, got '{}'", val),
        })?;
    }
    Ok(config)
}
