//! Worker Manager
//!
//! Label-keyed registry of background language-service workers. Workers are
//! spawned lazily on first use with race-safe de-duplication, shared between
//! registrations of the same label and terminated when the last registration
//! is released.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::config;
use crate::error::WorkerError;
use crate::infra::Disposable;
use crate::infra::worker::protocol::{DocumentParams, methods};
use crate::infra::worker::{ServiceFactory, WorkerClient, WorkerHandle};
use crate::models::document::{
    CompletionItem, Diagnostic, FormattingOptions, Hover, Position, Range, TextDocument, TextEdit,
};
use crate::models::providers::{Capability, Providers};

/// Language selector matching every language
pub const ANY_LANGUAGE: &str = "*";

/// What a worker source sees when asked to start a worker
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub label: String,
    pub base_worker_path: String,
}

impl WorkerContext {
    pub fn script_path(&self, script: &str) -> PathBuf {
        Path::new(&self.base_worker_path).join(script)
    }
}

type SpawnFn = dyn Fn(&WorkerContext) -> Result<WorkerHandle, WorkerError> + Send + Sync;

/// Factory producing a live worker for a registration
#[derive(Clone)]
pub struct WorkerSource(Arc<SpawnFn>);

impl WorkerSource {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&WorkerContext) -> Result<WorkerHandle, WorkerError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// In-process worker thread hosting `factory` behind a bridge
    pub fn thread(factory: ServiceFactory) -> Self {
        Self::new(move |ctx| WorkerHandle::spawn_thread(&ctx.label, Arc::clone(&factory)))
    }

    /// Worker executable found under the base worker path
    pub fn script(script: impl Into<String>) -> Self {
        let script = script.into();
        Self::new(move |ctx| {
            WorkerHandle::spawn_process(&ctx.label, &ctx.script_path(&script), &[])
        })
    }

    fn spawn(&self, ctx: &WorkerContext) -> Result<WorkerHandle, WorkerError> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for WorkerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkerSource(..)")
    }
}

#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub label: String,
    pub languages: Vec<String>,
    pub options: Value,
    pub src: WorkerSource,
    pub providers: Providers,
}

impl WorkerRegistration {
    pub fn new(label: impl Into<String>, src: WorkerSource) -> Self {
        Self {
            label: label.into(),
            languages: Vec::new(),
            options: Value::Null,
            src,
            providers: Providers::none(),
        }
    }

    pub fn language(mut self, id: impl Into<String>) -> Self {
        self.languages.push(id.into());
        self
    }

    pub fn languages<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers = providers;
        self
    }

    pub fn provides(mut self, capability: Capability) -> Self {
        self.providers.set(capability, true);
        self
    }

    fn serves(&self, language: &str) -> bool {
        self.languages
            .iter()
            .any(|l| l == language || l == ANY_LANGUAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Registered,
    Spawning,
    Running,
    Failed(String),
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Failed(_) => "failed",
        }
    }
}

/// Registration summary for status output
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub label: String,
    pub languages: Vec<String>,
    pub providers: Vec<&'static str>,
    pub references: usize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type SpawnOutcome = Option<Result<Arc<WorkerClient>, String>>;

enum EntryState {
    Registered,
    Spawning(watch::Receiver<SpawnOutcome>),
    Ready(Arc<WorkerClient>),
    Failed(String),
}

struct Entry {
    id: u64,
    registration: WorkerRegistration,
    references: usize,
    state: EntryState,
}

impl Entry {
    fn status(&self) -> WorkerStatus {
        match &self.state {
            EntryState::Registered => WorkerStatus::Registered,
            EntryState::Spawning(_) => WorkerStatus::Spawning,
            EntryState::Ready(client) if client.is_running() => WorkerStatus::Running,
            EntryState::Ready(_) => WorkerStatus::Registered,
            EntryState::Failed(reason) => WorkerStatus::Failed(reason.clone()),
        }
    }

    fn routable(&self) -> bool {
        !matches!(self.state, EntryState::Failed(_))
    }
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    next_id: u64,
}

impl Registry {
    fn find_mut(&mut self, label: &str) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.registration.label == label)
    }
}

struct ManagerInner {
    base_worker_path: Mutex<String>,
    registry: Mutex<Registry>,
}

#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<ManagerInner>,
}

impl WorkerManager {
    pub fn new(base_worker_path: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                base_worker_path: Mutex::new(base_worker_path.into()),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn base_worker_path(&self) -> String {
        lock(&self.inner.base_worker_path).clone()
    }

    /// Returns the previous path
    pub fn set_base_worker_path(&self, path: impl Into<String>) -> String {
        std::mem::replace(&mut *lock(&self.inner.base_worker_path), path.into())
    }

    /// Store a registration without spawning. A label that is already
    /// registered is reused; the handle releases one reference.
    pub fn register(&self, registration: WorkerRegistration) -> Result<Disposable, WorkerError> {
        if registration.label.trim().is_empty() {
            return Err(WorkerError::Protocol(
                "worker label must not be empty".to_string(),
            ));
        }

        let label = registration.label.clone();
        let id = {
            let mut registry = lock(&self.inner.registry);
            if let Some(entry) = registry.find_mut(&label) {
                entry.references += 1;
                tracing::debug!(
                    "Worker '{}' already registered, reusing ({} references)",
                    label,
                    entry.references
                );
                entry.id
            } else {
                registry.next_id += 1;
                let id = registry.next_id;
                registry.entries.push(Entry {
                    id,
                    registration,
                    references: 1,
                    state: EntryState::Registered,
                });
                tracing::debug!("Worker '{}' registered", label);
                id
            }
        };

        let inner = Arc::downgrade(&self.inner);
        Ok(Disposable::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.release(id);
            }
        }))
    }

    /// Get or start the worker for a label (race-safe)
    pub async fn client(&self, label: &str) -> Result<Arc<WorkerClient>, WorkerError> {
        let mut outcome = {
            let mut registry = lock(&self.inner.registry);
            let entry = registry
                .find_mut(label)
                .ok_or_else(|| WorkerError::NotRegistered(label.to_string()))?;

            let waiting = match &entry.state {
                EntryState::Ready(client) if client.is_running() => return Ok(Arc::clone(client)),
                EntryState::Failed(reason) => return Err(WorkerError::spawn_failed(label, reason)),
                EntryState::Spawning(rx) => Some(rx.clone()),
                EntryState::Ready(_) | EntryState::Registered => None,
            };

            match waiting {
                Some(rx) => rx,
                None => {
                    if matches!(entry.state, EntryState::Ready(_)) {
                        tracing::info!("Worker '{}' exited, restarting", label);
                    }
                    let (tx, rx) = watch::channel(None);
                    entry.state = EntryState::Spawning(rx.clone());
                    self.inner
                        .start_spawn(entry.id, entry.registration.clone(), tx);
                    rx
                }
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match result {
            Some(Ok(client)) => Ok(client),
            Some(Err(reason)) => Err(WorkerError::spawn_failed(label, reason)),
            None => {
                let reason = "worker start aborted".to_string();
                if let Some(entry) = lock(&self.inner.registry).find_mut(label)
                    && matches!(entry.state, EntryState::Spawning(_))
                {
                    entry.state = EntryState::Failed(reason.clone());
                }
                Err(WorkerError::spawn_failed(label, reason))
            }
        }
    }

    /// First non-failed registration serving `language` that declared `capability`
    pub fn route(&self, language: &str, capability: Capability) -> Option<String> {
        lock(&self.inner.registry)
            .entries
            .iter()
            .find(|e| {
                e.routable()
                    && e.registration.serves(language)
                    && e.registration.providers.supports(capability)
            })
            .map(|e| e.registration.label.clone())
    }

    pub fn has_capability(&self, language: &str, capability: Capability) -> bool {
        self.route(language, capability).is_some()
    }

    /// Union of the capabilities routable for a language
    pub fn capabilities(&self, language: &str) -> Providers {
        lock(&self.inner.registry)
            .entries
            .iter()
            .filter(|e| e.routable() && e.registration.serves(language))
            .fold(Providers::none(), |acc, e| acc.merge(&e.registration.providers))
    }

    /// Languages named by any registration, in registration order
    pub fn languages(&self) -> Vec<String> {
        let registry = lock(&self.inner.registry);
        let mut languages: Vec<String> = Vec::new();
        for language in registry.entries.iter().flat_map(|e| &e.registration.languages) {
            if !languages.contains(language) {
                languages.push(language.clone());
            }
        }
        languages
    }

    /// Route a capability request by the document's language
    pub async fn request(
        &self,
        capability: Capability,
        mut params: DocumentParams,
    ) -> Result<Value, WorkerError> {
        let language = params.document.language_id.clone();
        let label = self
            .route(&language, capability)
            .ok_or(WorkerError::NoProvider {
                language,
                capability,
            })?;

        let client = self.client(&label).await?;
        params.service = label;
        let method = capability.method();
        client
            .request(method, serde_json::to_value(&params)?, config::timeout_for(method))
            .await
    }

    pub async fn hover(
        &self,
        document: &TextDocument,
        position: Position,
    ) -> Result<Option<Hover>, WorkerError> {
        let params = DocumentParams::new("", document.clone()).at(position);
        self.typed(Capability::Hover, params).await
    }

    pub async fn completion(
        &self,
        document: &TextDocument,
        position: Position,
    ) -> Result<Vec<CompletionItem>, WorkerError> {
        let params = DocumentParams::new("", document.clone()).at(position);
        self.typed(Capability::CompletionItem, params).await
    }

    pub async fn diagnostics(
        &self,
        document: &TextDocument,
    ) -> Result<Vec<Diagnostic>, WorkerError> {
        let params = DocumentParams::new("", document.clone());
        self.typed(Capability::Diagnostics, params).await
    }

    pub async fn format(
        &self,
        document: &TextDocument,
        options: FormattingOptions,
    ) -> Result<Vec<TextEdit>, WorkerError> {
        let params = DocumentParams::new("", document.clone()).with_options(options);
        self.typed(Capability::DocumentFormattingEdit, params).await
    }

    pub async fn format_range(
        &self,
        document: &TextDocument,
        range: Range,
        options: FormattingOptions,
    ) -> Result<Vec<TextEdit>, WorkerError> {
        let params = DocumentParams::new("", document.clone())
            .in_range(range)
            .with_options(options);
        self.typed(Capability::DocumentRangeFormattingEdit, params)
            .await
    }

    async fn typed<T: DeserializeOwned>(
        &self,
        capability: Capability,
        params: DocumentParams,
    ) -> Result<T, WorkerError> {
        let value = self.request(capability, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn status(&self, label: &str) -> Option<WorkerStatus> {
        lock(&self.inner.registry)
            .entries
            .iter()
            .find(|e| e.registration.label == label)
            .map(Entry::status)
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        lock(&self.inner.registry)
            .entries
            .iter()
            .map(|e| {
                let status = e.status();
                WorkerInfo {
                    label: e.registration.label.clone(),
                    languages: e.registration.languages.clone(),
                    providers: e.registration.providers.iter().map(|c| c.flag_name()).collect(),
                    references: e.references,
                    status: status.as_str(),
                    error: match status {
                        WorkerStatus::Failed(reason) => Some(reason),
                        _ => None,
                    },
                }
            })
            .collect()
    }

    pub fn is_registered(&self, label: &str) -> bool {
        lock(&self.inner.registry)
            .entries
            .iter()
            .any(|e| e.registration.label == label)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminate every live worker and drop all registrations
    pub fn shutdown_all(&self) {
        let clients: Vec<Arc<WorkerClient>> = {
            let mut registry = lock(&self.inner.registry);
            registry
                .entries
                .drain(..)
                .filter_map(|e| match e.state {
                    EntryState::Ready(client) => Some(client),
                    _ => None,
                })
                .collect()
        };

        for client in clients {
            client.terminate();
            tracing::info!("Worker '{}' stopped", client.label());
        }
    }
}

impl ManagerInner {
    fn release(&self, id: u64) {
        let client = {
            let mut registry = lock(&self.registry);
            let Some(pos) = registry.entries.iter().position(|e| e.id == id) else {
                return;
            };
            let entry = &mut registry.entries[pos];
            entry.references = entry.references.saturating_sub(1);
            if entry.references > 0 {
                return;
            }

            let entry = registry.entries.remove(pos);
            tracing::debug!("Worker '{}' unregistered", entry.registration.label);
            match entry.state {
                EntryState::Ready(client) => Some(client),
                _ => None,
            }
        };

        if let Some(client) = client {
            client.terminate();
            tracing::info!("Worker '{}' stopped", client.label());
        }
    }

    fn start_spawn(
        self: &Arc<Self>,
        id: u64,
        registration: WorkerRegistration,
        tx: watch::Sender<SpawnOutcome>,
    ) {
        let inner = Arc::clone(self);
        let ctx = WorkerContext {
            label: registration.label.clone(),
            base_worker_path: lock(&self.base_worker_path).clone(),
        };

        tokio::spawn(async move {
            let result = spawn_worker(&ctx, &registration).await;
            inner.finish_spawn(id, &ctx.label, result, tx);
        });
    }

    fn finish_spawn(
        &self,
        id: u64,
        label: &str,
        result: Result<Arc<WorkerClient>, WorkerError>,
        tx: watch::Sender<SpawnOutcome>,
    ) {
        let mut outcome = result.map_err(spawn_reason);

        let orphan = {
            let mut registry = lock(&self.registry);
            match registry.entries.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    entry.state = match &outcome {
                        Ok(client) => EntryState::Ready(Arc::clone(client)),
                        Err(reason) => {
                            tracing::warn!("Worker '{}' failed to start: {}", label, reason);
                            EntryState::Failed(reason.clone())
                        }
                    };
                    None
                }
                None => outcome.as_ref().ok().cloned(),
            }
        };

        if let Some(client) = orphan {
            tracing::debug!("Worker '{}' released while starting", label);
            client.terminate();
            outcome = Err("released while starting".to_string());
        }

        let _ = tx.send(Some(outcome));
    }
}

async fn spawn_worker(
    ctx: &WorkerContext,
    registration: &WorkerRegistration,
) -> Result<Arc<WorkerClient>, WorkerError> {
    let handle = registration.src.spawn(ctx)?;
    let client = WorkerClient::start(handle)?;

    let timeout = config::timeout_for(methods::INITIALIZE);
    if let Err(e) = client.initialize(registration.options.clone(), timeout).await {
        client.terminate();
        return Err(e);
    }

    tracing::info!("Worker '{}' started", ctx.label);
    Ok(client)
}

fn spawn_reason(err: WorkerError) -> String {
    match err {
        WorkerError::SpawnFailed { reason, .. } => reason,
        other => other.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
