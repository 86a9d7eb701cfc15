//! Engine sources
//!
//! Where an engine comes from: an on-disk distribution or the host binary.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Engine;
use crate::error::LoadError;
use crate::models::config::{KitConfig, PathsConfig};

/// Entry script every engine distribution ships at its base path
pub const ENGINE_ENTRY: &str = "loader.js";

#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    pub paths: PathsConfig,
}

impl From<&KitConfig> for LoaderOptions {
    fn from(config: &KitConfig) -> Self {
        Self {
            paths: config.paths.clone(),
        }
    }
}

#[async_trait]
pub trait EngineSource: Send + Sync {
    /// Produce a fresh engine. Implementations should stop early once
    /// `cancel` fires; the caller also drops the future on cancellation.
    async fn load(&self, options: &LoaderOptions, cancel: CancellationToken)
    -> Result<Engine, LoadError>;
}

/// Engine compiled into the host
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledEngineSource;

#[async_trait]
impl EngineSource for BundledEngineSource {
    async fn load(
        &self,
        options: &LoaderOptions,
        cancel: CancellationToken,
    ) -> Result<Engine, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(Engine::new(options.paths.workers.clone()))
    }
}

/// Engine distribution on disk at `paths.monaco`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEngineSource;

#[async_trait]
impl EngineSource for LocalEngineSource {
    async fn load(
        &self,
        options: &LoaderOptions,
        cancel: CancellationToken,
    ) -> Result<Engine, LoadError> {
        let base = Path::new(&options.paths.monaco);

        let metadata = tokio::fs::metadata(base)
            .await
            .map_err(|_| LoadError::NotFound(base.display().to_string()))?;
        if !metadata.is_dir() {
            return Err(LoadError::Failed(format!(
                "{} is not a directory",
                base.display()
            )));
        }

        let entry = base.join(ENGINE_ENTRY);
        if !tokio::fs::try_exists(&entry).await.unwrap_or(false) {
            return Err(LoadError::Failed(format!(
                "missing {} in {}",
                ENGINE_ENTRY,
                base.display()
            )));
        }

        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        tracing::info!("Editor engine loaded from {}", base.display());
        Ok(Engine::new(options.paths.workers.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(monaco: &Path) -> LoaderOptions {
        LoaderOptions {
            paths: PathsConfig {
                monaco: monaco.display().to_string(),
                workers: "/static/workers".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_local_source_requires_entry_script() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalEngineSource;

        let err = source
            .load(&options(dir.path()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Failed(msg) if msg.contains("loader.js")));

        std::fs::write(dir.path().join(ENGINE_ENTRY), "// engine").unwrap();
        let engine = source
            .load(&options(dir.path()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(engine.workers().base_worker_path(), "/static/workers");
    }

    #[tokio::test]
    async fn test_local_source_missing_path() {
        let err = LocalEngineSource
            .load(
                &options(Path::new("/nonexistent/monaco/vs")),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, LoadError::NotFound("/nonexistent/monaco/vs".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = BundledEngineSource
            .load(&LoaderOptions::default(), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
