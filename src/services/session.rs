//! Sessions
//!
//! A session is one consumer's view of the shared engine. Mounting reuses the
//! parent's engine or starts the loader pipeline; the session publishes
//! snapshots (`engine`, `is_loading`) through a watch channel and owns
//! everything the pipeline and the consumer set up, releasing it on unmount.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::engine::{
    BundledEngineSource, Engine, EngineSlot, EngineSource, LoadState, LoaderOptions,
};
use super::loader::{LoadRequest, Loaded, Loader, OnLoad};
use super::plugins::{PluginRegistry, PluginRequest, RegistryPolicy};
use crate::error::{KitError, KitResult, LoadError};
use crate::infra::{Disposable, DisposableStore, DisposeTarget, as_disposable};
use crate::models::config::{KitConfig, PathsConfig, TeardownPolicy};
use crate::models::theme::{ThemeMap, ThemeSelection};

/// Called with the new theme name and the engine whenever the theme changes
pub type ThemeChangeListener = Arc<dyn Fn(&str, &Arc<Engine>) + Send + Sync>;

pub struct SessionOptions {
    pub paths: PathsConfig,
    pub plugins: Vec<PluginRequest>,
    pub languages: Vec<PluginRequest>,
    pub themes: ThemeMap,
    pub theme: Option<ThemeSelection>,
    pub on_load: Option<OnLoad>,
    pub on_theme_change: Option<ThemeChangeListener>,
    pub default_editor_options: Value,
    pub teardown: TeardownPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&KitConfig::default())
    }
}

impl SessionOptions {
    pub fn from_config(config: &KitConfig) -> Self {
        Self {
            paths: config.paths.clone(),
            plugins: config.plugins.iter().cloned().map(PluginRequest::from).collect(),
            languages: config
                .languages
                .iter()
                .cloned()
                .map(PluginRequest::from)
                .collect(),
            themes: config.themes.clone(),
            theme: config.theme.as_deref().map(ThemeSelection::named),
            on_load: None,
            on_theme_change: None,
            default_editor_options: config.editor.clone(),
            teardown: config.loader.teardown,
        }
    }

    pub fn plugin(mut self, request: impl Into<PluginRequest>) -> Self {
        self.plugins.push(request.into());
        self
    }

    /// Replace the language list
    pub fn languages<I, R>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRequest>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn themes(mut self, themes: ThemeMap) -> Self {
        self.themes = themes;
        self
    }

    pub fn theme(mut self, theme: impl Into<ThemeSelection>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn on_load(mut self, on_load: OnLoad) -> Self {
        self.on_load = Some(on_load);
        self
    }

    pub fn on_theme_change(
        mut self,
        listener: impl Fn(&str, &Arc<Engine>) + Send + Sync + 'static,
    ) -> Self {
        self.on_theme_change = Some(Arc::new(listener));
        self
    }

    pub fn default_editor_options(mut self, options: Value) -> Self {
        self.default_editor_options = options;
        self
    }

    pub fn teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }
}

/// Where sessions get their engine from
#[derive(Clone)]
pub struct SessionContext {
    pub slot: EngineSlot,
    pub source: Arc<dyn EngineSource>,
    pub registry: Arc<PluginRegistry>,
}

static GLOBAL: OnceLock<SessionContext> = OnceLock::new();

impl SessionContext {
    pub fn new(
        slot: EngineSlot,
        source: Arc<dyn EngineSource>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            slot,
            source,
            registry,
        }
    }

    /// Isolated context around the bundled engine and builtin plugins
    pub fn bundled(policy: RegistryPolicy) -> Self {
        Self::new(
            EngineSlot::new(),
            Arc::new(BundledEngineSource),
            Arc::new(PluginRegistry::with_builtins().with_policy(policy)),
        )
    }

    /// Process-wide context over the global slot
    pub fn global() -> Self {
        GLOBAL
            .get_or_init(|| Self {
                slot: EngineSlot::global(),
                source: Arc::new(BundledEngineSource),
                registry: Arc::new(PluginRegistry::with_builtins()),
            })
            .clone()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub engine: Option<Arc<Engine>>,
    pub is_loading: bool,
    pub state: LoadState,
    pub default_editor_options: Value,
}

#[derive(Default)]
struct Resources {
    plugins: Option<DisposableStore>,
    on_load: Option<DisposableStore>,
    load: Option<CancellationToken>,
    theme_listener: Option<Disposable>,
}

struct SessionInner {
    ctx: SessionContext,
    snapshot: watch::Sender<SessionSnapshot>,
    teardown: TeardownPolicy,
    on_theme_change: Option<ThemeChangeListener>,
    resources: Mutex<Resources>,
    effects: DisposableStore,
    closed: CancellationToken,
    unmounted: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Mount a session. An engine held by `parent` is reused as is and
    /// nothing loads. Otherwise the bootstrap pipeline runs, against the
    /// slot's engine when there is one; plugins it already has are skipped.
    pub fn mount(ctx: &SessionContext, options: SessionOptions, parent: Option<&Session>) -> Self {
        let SessionOptions {
            paths,
            plugins,
            languages,
            themes,
            theme,
            on_load,
            on_theme_change,
            default_editor_options,
            teardown,
        } = options;

        if let Some(engine) = parent.and_then(Session::engine) {
            let (snapshot, _) = watch::channel(SessionSnapshot {
                engine: Some(Arc::clone(&engine)),
                is_loading: false,
                state: LoadState::Ready,
                default_editor_options,
            });
            let inner =
                SessionInner::new(ctx, snapshot, teardown, on_theme_change, Resources::default());
            inner.watch_theme(&engine);
            tracing::debug!("Session mounted on the parent engine");
            return Self { inner };
        }

        let existing = ctx.slot.current();
        let (snapshot, _) = watch::channel(SessionSnapshot {
            engine: existing.clone(),
            is_loading: true,
            state: LoadState::Loading,
            default_editor_options,
        });

        let task = Loader::start(
            &ctx.slot,
            Arc::clone(&ctx.source),
            Arc::clone(&ctx.registry),
            LoadRequest {
                options: LoaderOptions { paths },
                engine: existing,
                plugins,
                languages,
                themes,
                theme,
                on_load,
            },
        );

        let resources = Resources {
            plugins: Some(task.plugin_disposables()),
            on_load: Some(task.on_load_disposables()),
            load: Some(task.cancel_token()),
            theme_listener: None,
        };
        let inner = SessionInner::new(ctx, snapshot, teardown, on_theme_change, resources);

        let owner = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let result = task.wait().await;
            if let Some(inner) = owner.upgrade() {
                inner.settle(result);
            }
        });

        Self { inner }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.inner.snapshot.borrow().engine.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.snapshot.borrow().is_loading
    }

    pub fn default_editor_options(&self) -> Value {
        self.inner.snapshot.borrow().default_editor_options.clone()
    }

    pub fn is_unmounted(&self) -> bool {
        self.inner.unmounted.load(Ordering::SeqCst)
    }

    /// Wait for the pipeline to finish
    pub async fn ready(&self) -> KitResult<Arc<Engine>> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|s| !s.is_loading)
            .await
            .map_err(|_| LoadError::Aborted)?
            .clone();

        match (snapshot.engine, snapshot.state) {
            (Some(engine), LoadState::Ready) => Ok(engine),
            (_, LoadState::Failed(message)) => Err(LoadError::Failed(message).into()),
            _ => Err(LoadError::Cancelled.into()),
        }
    }

    /// Run `f` once the engine is available. Its disposables are released by
    /// the returned handle or on unmount, whichever comes first.
    pub fn use_engine_effect<F, T>(&self, f: F) -> Disposable
    where
        F: FnOnce(Arc<Engine>) -> T + Send + 'static,
        T: Into<DisposeTarget> + 'static,
    {
        let effect = DisposableStore::new();
        self.inner.effects.push(effect.clone().into_disposable());

        if let Some(engine) = self.engine() {
            effect.push(as_disposable(f(engine)));
            return effect.into_disposable();
        }

        let mut rx = self.subscribe();
        let closed = self.inner.closed.clone();
        let pending = effect.clone();
        tokio::spawn(async move {
            let engine = tokio::select! {
                biased;
                _ = closed.cancelled() => return,
                snapshot = rx.wait_for(|s| s.engine.is_some()) => match snapshot {
                    Ok(snapshot) => snapshot.engine.clone(),
                    Err(_) => return,
                },
            };
            if let Some(engine) = engine {
                pending.push(as_disposable(f(engine)));
            }
        });

        effect.into_disposable()
    }

    /// Apply a theme on the loaded engine
    pub async fn set_theme(&self, theme: impl Into<ThemeSelection>) -> KitResult<bool> {
        let theme = theme.into();
        let engine = self.ready().await?;
        Ok(engine.themes().apply(&theme).await)
    }

    /// Define themes on the loaded engine
    pub async fn set_themes(&self, themes: &ThemeMap) -> KitResult<()> {
        let engine = self.ready().await?;
        engine.themes().define_themes(themes);
        Ok(())
    }

    /// Release everything this session set up. Idempotent.
    pub fn unmount(&self) {
        self.inner.unmount();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.unmount();
    }
}

impl SessionInner {
    fn new(
        ctx: &SessionContext,
        snapshot: watch::Sender<SessionSnapshot>,
        teardown: TeardownPolicy,
        on_theme_change: Option<ThemeChangeListener>,
        resources: Resources,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx: ctx.clone(),
            snapshot,
            teardown,
            on_theme_change,
            resources: Mutex::new(resources),
            effects: DisposableStore::new(),
            closed: CancellationToken::new(),
            unmounted: AtomicBool::new(false),
        })
    }

    fn settle(self: &Arc<Self>, result: Result<Loaded, KitError>) {
        if self.unmounted.load(Ordering::SeqCst) {
            return;
        }

        match result {
            Ok(loaded) => {
                self.watch_theme(&loaded.engine);
                self.snapshot.send_modify(|s| {
                    s.engine = Some(loaded.engine);
                    s.is_loading = false;
                    s.state = LoadState::Ready;
                });
            }
            Err(e) => {
                let state = match e {
                    KitError::Load(LoadError::Cancelled) => LoadState::Unloaded,
                    other => LoadState::Failed(other.to_string()),
                };
                self.snapshot.send_modify(|s| {
                    s.is_loading = false;
                    s.state = state;
                });
            }
        }
    }

    fn watch_theme(self: &Arc<Self>, engine: &Arc<Engine>) {
        let Some(listener) = self.on_theme_change.clone() else {
            return;
        };

        let target = Arc::downgrade(engine);
        let handle = engine.themes().on_did_change_theme(move |name| {
            if let Some(engine) = Weak::upgrade(&target) {
                listener(name, &engine);
            }
        });

        let mut resources = lock(&self.resources);
        if self.unmounted.load(Ordering::SeqCst) {
            drop(resources);
            handle.dispose();
            return;
        }
        resources.theme_listener = Some(handle);
    }

    fn unmount(&self) {
        let resources = {
            let mut resources = lock(&self.resources);
            if self.unmounted.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *resources)
        };

        if let Some(plugins) = resources.plugins {
            plugins.dispose();
        }
        if let Some(on_load) = resources.on_load {
            on_load.dispose();
        }
        if let Some(load) = resources.load {
            load.cancel();
        }
        self.closed.cancel();
        self.effects.dispose();
        if let Some(listener) = resources.theme_listener {
            listener.dispose();
        }

        if self.teardown == TeardownPolicy::DisposeEngine {
            if let Some(engine) = self.ctx.slot.reset() {
                engine.shutdown();
                tracing::info!("Engine disposed on unmount");
            }
            self.snapshot.send_modify(|s| {
                s.engine = None;
                s.state = LoadState::Unloaded;
            });
        }
        self.snapshot.send_modify(|s| s.is_loading = false);
        tracing::debug!("Session unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::providers::Capability;
    use crate::services::loader::on_load;
    use crate::services::plugins::tests::recording;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EngineSource for SlowSource {
        async fn load(
            &self,
            options: &LoaderOptions,
            _cancel: CancellationToken,
        ) -> Result<Engine, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(Engine::new(options.paths.workers.clone()))
        }
    }

    fn slow_context() -> (SessionContext, Arc<SlowSource>) {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
        });
        let ctx = SessionContext::new(
            EngineSlot::new(),
            Arc::clone(&source) as Arc<dyn EngineSource>,
            Arc::new(PluginRegistry::with_builtins()),
        );
        (ctx, source)
    }

    #[tokio::test]
    async fn test_mount_resolves_loading() {
        let ctx = SessionContext::bundled(RegistryPolicy::default());
        let options = SessionOptions::default()
            .plugin(("prettier", json!(["typescript"])))
            .plugin("typings")
            .languages(["typescript"]);

        let session = Session::mount(&ctx, options, None);
        assert!(session.is_loading());
        assert!(session.engine().is_none());

        let engine = session.ready().await.unwrap();
        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.state, LoadState::Ready);
        assert!(snapshot.engine.is_some());
        assert_eq!(snapshot.default_editor_options["automaticLayout"], json!(true));
        assert!(engine
            .workers()
            .capabilities("typescript")
            .document_formatting_edit);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_share_one_load() {
        let (ctx, source) = slow_context();
        let a = Session::mount(&ctx, SessionOptions::default(), None);
        let b = Session::mount(&ctx, SessionOptions::default(), None);

        let (ea, eb) = tokio::join!(a.ready(), b.ready());
        assert!(Arc::ptr_eq(&ea.unwrap(), &eb.unwrap()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_child_reuses_parent_engine() {
        let (ctx, source) = slow_context();
        let parent = Session::mount(&ctx, SessionOptions::default(), None);
        let engine = parent.ready().await.unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let options = SessionOptions::default().on_load(on_load(move |_engine| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let child = Session::mount(&ctx, options, Some(&parent));
        assert!(!child.is_loading());
        assert_eq!(child.snapshot().state, LoadState::Ready);
        assert!(Arc::ptr_eq(&child.engine().unwrap(), &engine));
        assert!(Arc::ptr_eq(&child.ready().await.unwrap(), &engine));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!child.is_loading());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_child_of_parent_engine_gets_theme_changes() {
        let ctx = SessionContext::bundled(RegistryPolicy::default());
        let parent = Session::mount(&ctx, SessionOptions::default(), None);
        let engine = parent.ready().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = SessionOptions::default()
            .on_theme_change(move |name, _engine| sink.lock().unwrap().push(name.to_string()));
        let child = Session::mount(&ctx, options, Some(&parent));
        assert!(child.set_theme("hc-black").await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["hc-black"]);

        child.unmount();
        assert_eq!(engine.themes().listener_count(), 0);
        assert!(Arc::ptr_eq(&parent.engine().unwrap(), &engine));
    }

    #[tokio::test]
    async fn test_unmount_releases_in_order() {
        let ctx = SessionContext::bundled(RegistryPolicy::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let on_load_log = Arc::clone(&log);
        let effect_log = Arc::clone(&log);

        let options = SessionOptions::default()
            .languages(Vec::<PluginRequest>::new())
            .plugin(recording("first", &log))
            .on_load(on_load(move |_engine| async move {
                Disposable::new(move || on_load_log.lock().unwrap().push("on_load".to_string()))
            }))
            .on_theme_change(|_name, _engine| {});

        let session = Session::mount(&ctx, options, None);
        let engine = session.ready().await.unwrap();
        let _effect = session.use_engine_effect(move |_engine| {
            Disposable::new(move || effect_log.lock().unwrap().push("effect".to_string()))
        });
        assert_eq!(engine.themes().listener_count(), 1);

        session.unmount();
        session.unmount();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["install first", "dispose first", "on_load", "effect"]
        );
        assert_eq!(engine.themes().listener_count(), 0);
        assert!(session.is_unmounted());
    }

    #[tokio::test]
    async fn test_effect_waits_for_engine() {
        let (ctx, _source) = slow_context();
        let session = Session::mount(&ctx, SessionOptions::default(), None);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);

        let _effect = session.use_engine_effect(move |_engine| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        session.ready().await.unwrap();
        for _ in 0..50 {
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_theme_change_after_mount() {
        let ctx = SessionContext::bundled(RegistryPolicy::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let options = SessionOptions::default()
            .theme("vs")
            .on_theme_change(move |name, _engine| sink.lock().unwrap().push(name.to_string()));
        let session = Session::mount(&ctx, options, None);
        let engine = session.ready().await.unwrap();
        assert_eq!(engine.themes().current(), "vs");
        assert!(seen.lock().unwrap().is_empty());

        assert!(session.set_theme("hc-black").await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["hc-black"]);

        let mut themes = ThemeMap::new();
        themes.insert("paper".into(), crate::models::theme::ThemeData::new("vs"));
        session.set_themes(&themes).await.unwrap();
        assert!(session.set_theme("paper").await.unwrap());
        assert!(!session.set_theme("missing").await.unwrap());
        assert_eq!(engine.themes().current(), "paper");
    }

    #[tokio::test]
    async fn test_keep_engine_on_unmount() {
        let ctx = SessionContext::bundled(RegistryPolicy::default());
        let session = Session::mount(&ctx, SessionOptions::default(), None);
        let engine = session.ready().await.unwrap();
        drop(session);

        assert!(Arc::ptr_eq(&ctx.slot.current().unwrap(), &engine));
        assert!(engine.installed_plugins().is_empty());
    }

    #[tokio::test]
    async fn test_dispose_engine_on_unmount() {
        let ctx = SessionContext::bundled(RegistryPolicy::default());
        let options = SessionOptions::default()
            .plugin("prettier")
            .teardown(TeardownPolicy::DisposeEngine);
        let session = Session::mount(&ctx, options, None);
        let engine = session.ready().await.unwrap();
        assert!(engine
            .workers()
            .has_capability("css", Capability::DocumentFormattingEdit));

        session.unmount();
        assert!(ctx.slot.current().is_none());
        assert!(engine.workers().is_empty());
        assert!(session.engine().is_none());
        assert_eq!(session.snapshot().state, LoadState::Unloaded);
    }

    #[tokio::test]
    async fn test_unmount_while_loading() {
        let (ctx, _source) = slow_context();
        let session = Session::mount(&ctx, SessionOptions::default(), None);
        session.unmount();

        let err = session.ready().await.unwrap_err();
        assert!(matches!(err, KitError::Load(LoadError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ctx.slot.state(), LoadState::Unloaded);
    }
}
