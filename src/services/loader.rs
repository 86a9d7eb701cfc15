//! Loader
//!
//! Bootstrap pipeline run for every mounted session:
//! engine, plugins then languages, themes, `on_load`.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::{Engine, EngineSlot, EngineSource, LoaderOptions};
use super::plugins::languages::language_request;
use super::plugins::{PluginHost, PluginRegistry, PluginRequest};
use crate::error::{KitError, LoadError};
use crate::infra::{Disposable, DisposableStore, DisposeTarget, as_disposable};
use crate::models::theme::{ThemeMap, ThemeSelection};

pub type OnLoad = Box<dyn FnOnce(Arc<Engine>) -> BoxFuture<'static, DisposeTarget> + Send>;

/// Wrap an async callback run once the engine is set up
pub fn on_load<F, Fut, T>(f: F) -> OnLoad
where
    F: FnOnce(Arc<Engine>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Into<DisposeTarget> + 'static,
{
    Box::new(move |engine| Box::pin(async move { f(engine).await.into() }))
}

#[derive(Default)]
pub struct LoadRequest {
    pub options: LoaderOptions,
    /// Engine to reuse instead of going through the slot
    pub engine: Option<Arc<Engine>>,
    pub plugins: Vec<PluginRequest>,
    pub languages: Vec<PluginRequest>,
    pub themes: ThemeMap,
    pub theme: Option<ThemeSelection>,
    pub on_load: Option<OnLoad>,
}

/// Result of a completed pipeline
#[derive(Debug)]
pub struct Loaded {
    pub engine: Arc<Engine>,
    /// Names installed by this run
    pub installed: Vec<String>,
    pub plugins: Disposable,
    pub on_load: Disposable,
}

pub struct Loader;

impl Loader {
    /// Run the pipeline on a background task. Must be called inside a tokio
    /// runtime.
    pub fn start(
        slot: &EngineSlot,
        source: Arc<dyn EngineSource>,
        registry: Arc<PluginRegistry>,
        request: LoadRequest,
    ) -> LoadTask {
        let cancel = CancellationToken::new();
        let plugins = DisposableStore::new();
        let on_load = DisposableStore::new();

        let pipeline = Pipeline {
            slot: slot.clone(),
            source,
            registry,
            cancel: cancel.clone(),
            plugins: plugins.clone(),
            on_load: on_load.clone(),
        };
        let handle = tokio::spawn(async move {
            let result = pipeline.run(request).await;
            match &result {
                Err(KitError::Load(LoadError::Cancelled)) => {
                    tracing::debug!("Editor initialization cancelled")
                }
                Err(e) => {
                    tracing::error!("An error occurred during initialization of the editor: {}", e)
                }
                Ok(loaded) => tracing::debug!(
                    "Editor initialized with plugins: {}",
                    loaded.installed.join(", ")
                ),
            }
            result
        });

        LoadTask {
            cancel,
            plugins,
            on_load,
            handle,
        }
    }
}

pub struct LoadTask {
    cancel: CancellationToken,
    plugins: DisposableStore,
    on_load: DisposableStore,
    handle: JoinHandle<Result<Loaded, KitError>>,
}

impl LoadTask {
    /// Stop at the next stage boundary and withdraw from the engine load
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run, for owners that outlive `wait`
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Handles of plugins installed so far, kept even when the run fails
    pub fn plugin_disposables(&self) -> DisposableStore {
        self.plugins.clone()
    }

    pub fn on_load_disposables(&self) -> DisposableStore {
        self.on_load.clone()
    }

    pub async fn wait(self) -> Result<Loaded, KitError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(LoadError::Cancelled.into()),
            Err(e) => Err(LoadError::Failed(format!("initialization task panicked: {}", e)).into()),
        }
    }
}

struct Pipeline {
    slot: EngineSlot,
    source: Arc<dyn EngineSource>,
    registry: Arc<PluginRegistry>,
    cancel: CancellationToken,
    plugins: DisposableStore,
    on_load: DisposableStore,
}

impl Pipeline {
    async fn run(self, request: LoadRequest) -> Result<Loaded, KitError> {
        let LoadRequest {
            options,
            engine,
            plugins,
            languages,
            themes,
            theme,
            on_load,
        } = request;

        let engine = match engine.or_else(|| self.slot.current()) {
            Some(engine) => engine,
            None => {
                let pending = self.slot.load(Arc::clone(&self.source), options);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        pending.cancel();
                        return Err(LoadError::Cancelled.into());
                    }
                    result = pending.wait() => result?,
                }
            }
        };

        let requests = plugins
            .into_iter()
            .chain(languages.into_iter().map(language_request));
        let ordered = self.registry.resolve_ordered(requests)?;
        self.checkpoint()?;
        let installed = PluginHost::install_all(&engine, ordered, &self.plugins).await?;
        self.checkpoint()?;

        if !themes.is_empty() {
            engine.themes().define_themes(&themes);
        }
        if let Some(theme) = &theme {
            engine.themes().apply(theme).await;
        }
        self.checkpoint()?;

        if let Some(callback) = on_load {
            let target = callback(Arc::clone(&engine)).await;
            self.on_load.push(as_disposable(target));
        }

        Ok(Loaded {
            engine,
            installed,
            plugins: self.plugins.clone().into_disposable(),
            on_load: self.on_load.clone().into_disposable(),
        })
    }

    fn checkpoint(&self) -> Result<(), KitError> {
        if self.cancel.is_cancelled() {
            return Err(LoadError::Cancelled.into());
        }
        Ok(())
    }
}
