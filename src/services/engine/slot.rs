//! Engine slot
//!
//! Holds at most one engine and de-duplicates loads: the first caller starts
//! the load task, later callers subscribe to the same outcome. The shared load
//! is aborted only once every waiter has cancelled.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::source::{EngineSource, LoaderOptions};
use super::{Engine, LoadState};
use crate::error::LoadError;

type LoadOutcome = Option<Result<Arc<Engine>, LoadError>>;

struct SharedLoad {
    id: u64,
    cancel: CancellationToken,
    interest: AtomicUsize,
    result: watch::Receiver<LoadOutcome>,
}

enum SlotState {
    Unloaded,
    Loading(Arc<SharedLoad>),
    Ready(Arc<Engine>),
    Failed(LoadError),
}

struct SlotInner {
    state: Mutex<SlotState>,
    next_id: AtomicU64,
    attempts: AtomicUsize,
}

#[derive(Clone)]
pub struct EngineSlot {
    inner: Arc<SlotInner>,
}

static GLOBAL: OnceLock<EngineSlot> = OnceLock::new();

impl Default for EngineSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineSlot {
    /// Isolated slot, for embedding and tests
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(SlotState::Unloaded),
                next_id: AtomicU64::new(0),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Process-wide slot
    pub fn global() -> Self {
        GLOBAL.get_or_init(Self::new).clone()
    }

    pub fn current(&self) -> Option<Arc<Engine>> {
        match &*self.inner.lock() {
            SlotState::Ready(engine) => Some(Arc::clone(engine)),
            _ => None,
        }
    }

    pub fn state(&self) -> LoadState {
        match &*self.inner.lock() {
            SlotState::Unloaded => LoadState::Unloaded,
            SlotState::Loading(_) => LoadState::Loading,
            SlotState::Ready(_) => LoadState::Ready,
            SlotState::Failed(e) => LoadState::Failed(e.to_string()),
        }
    }

    /// Number of load tasks started so far
    pub fn load_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Adopt an engine that already exists in the host. A load in flight is
    /// abandoned.
    pub fn init(&self, engine: Arc<Engine>) {
        let previous = std::mem::replace(&mut *self.inner.lock(), SlotState::Ready(engine));
        if let SlotState::Loading(shared) = previous {
            shared.cancel.cancel();
        }
        tracing::debug!("Editor engine adopted");
    }

    /// Forget the published engine and return it. A load in flight is
    /// cancelled.
    pub fn reset(&self) -> Option<Arc<Engine>> {
        let previous = std::mem::replace(&mut *self.inner.lock(), SlotState::Unloaded);
        match previous {
            SlotState::Ready(engine) => Some(engine),
            SlotState::Loading(shared) => {
                shared.cancel.cancel();
                None
            }
            _ => None,
        }
    }

    /// Get the engine, starting a load if none is published or in flight.
    /// Must be called inside a tokio runtime.
    pub fn load(&self, source: Arc<dyn EngineSource>, options: LoaderOptions) -> PendingEngine {
        let shared = {
            let mut state = self.inner.lock();
            match &*state {
                SlotState::Ready(engine) => return PendingEngine::ready(Arc::clone(engine)),
                SlotState::Loading(shared) if shared.join() => {
                    return PendingEngine::waiting(Arc::clone(shared));
                }
                // An aborted load still shows as loading until its task finishes
                SlotState::Loading(_) => {
                    tracing::debug!("Previous engine load aborted, restarting")
                }
                SlotState::Unloaded | SlotState::Failed(_) => {}
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = watch::channel(None);
            let shared = Arc::new(SharedLoad {
                id,
                cancel: CancellationToken::new(),
                interest: AtomicUsize::new(1),
                result: rx,
            });
            *state = SlotState::Loading(Arc::clone(&shared));
            self.inner.attempts.fetch_add(1, Ordering::SeqCst);

            let inner = Arc::clone(&self.inner);
            let cancel = shared.cancel.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(LoadError::Cancelled),
                    result = source.load(&options, cancel.clone()) => result,
                };
                inner.finish(id, result.map(Arc::new), tx);
            });
            shared
        };

        tracing::info!("Loading editor engine");
        PendingEngine::waiting(shared)
    }
}

impl SharedLoad {
    /// Register one more waiter, unless every previous waiter already left
    fn join(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.interest
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then_some(n + 1))
            .is_ok()
    }
}

impl SlotInner {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn finish(
        &self,
        id: u64,
        result: Result<Arc<Engine>, LoadError>,
        tx: watch::Sender<LoadOutcome>,
    ) {
        {
            let mut state = self.lock();
            let current = matches!(&*state, SlotState::Loading(shared) if shared.id == id);
            if current {
                *state = match &result {
                    Ok(engine) => SlotState::Ready(Arc::clone(engine)),
                    Err(LoadError::Cancelled) => SlotState::Unloaded,
                    Err(e) => SlotState::Failed(e.clone()),
                };
            }
        }

        match &result {
            Ok(_) => tracing::info!("Editor engine ready"),
            Err(e) if e.is_cancelled() => tracing::debug!("Editor engine load cancelled"),
            Err(e) => tracing::debug!("Editor engine load failed: {}", e),
        }
        let _ = tx.send(Some(result));
    }
}

enum Pending {
    Ready(Arc<Engine>),
    Waiting(Arc<SharedLoad>),
}

/// One caller's interest in an engine load
pub struct PendingEngine {
    pending: Pending,
    cancelled: AtomicBool,
    cancel_token: CancellationToken,
}

impl PendingEngine {
    fn ready(engine: Arc<Engine>) -> Self {
        Self::from_pending(Pending::Ready(engine))
    }

    fn waiting(shared: Arc<SharedLoad>) -> Self {
        Self::from_pending(Pending::Waiting(shared))
    }

    fn from_pending(pending: Pending) -> Self {
        Self {
            pending,
            cancelled: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        match &self.pending {
            Pending::Ready(_) => true,
            Pending::Waiting(shared) => matches!(&*shared.result.borrow(), Some(Ok(_))),
        }
    }

    pub async fn wait(&self) -> Result<Arc<Engine>, LoadError> {
        let shared = match &self.pending {
            Pending::Ready(engine) => return Ok(Arc::clone(engine)),
            Pending::Waiting(shared) => shared,
        };

        let mut rx = shared.result.clone();
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(LoadError::Cancelled),
            outcome = rx.wait_for(Option::is_some) => match outcome {
                Ok(value) => (*value).clone().unwrap_or(Err(LoadError::Aborted)),
                Err(_) => Err(LoadError::Aborted),
            },
        }
    }

    /// Withdraw this caller. No-op once the engine is ready.
    pub fn cancel(&self) {
        let Pending::Waiting(shared) = &self.pending else {
            return;
        };
        if self.is_ready() || self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel_token.cancel();
        if shared.interest.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::debug!("Last waiter withdrew, aborting engine load");
            shared.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingSource {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EngineSource for CountingSource {
        async fn load(
            &self,
            options: &LoaderOptions,
            _cancel: CancellationToken,
        ) -> Result<Engine, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(LoadError::Failed("network unreachable".to_string()));
            }
            Ok(Engine::new(options.paths.workers.clone()))
        }
    }

    async fn settled(slot: &EngineSlot) -> LoadState {
        loop {
            let state = slot.state();
            if state.is_settled() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_attempt() {
        let slot = EngineSlot::new();
        let source = CountingSource::new(20);

        let pending: Vec<PendingEngine> = (0..8)
            .map(|_| slot.load(source.clone(), LoaderOptions::default()))
            .collect();
        assert_eq!(slot.state(), LoadState::Loading);

        let engines = futures::future::join_all(pending.iter().map(|p| p.wait())).await;
        let first = engines[0].as_ref().unwrap();
        for engine in &engines {
            assert!(Arc::ptr_eq(first, engine.as_ref().unwrap()));
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(slot.load_attempts(), 1);

        let again = slot.load(source.clone(), LoaderOptions::default());
        assert!(again.is_ready());
        assert!(Arc::ptr_eq(first, &again.wait().await.unwrap()));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_one_cancelled_waiter_does_not_abort_shared_load() {
        let slot = EngineSlot::new();
        let source = CountingSource::new(20);

        let a = slot.load(source.clone(), LoaderOptions::default());
        let b = slot.load(source.clone(), LoaderOptions::default());
        a.cancel();

        assert_eq!(a.wait().await.unwrap_err(), LoadError::Cancelled);
        assert!(b.wait().await.is_ok());
        assert_eq!(slot.state(), LoadState::Ready);
    }

    #[tokio::test]
    async fn test_all_waiters_cancelled_returns_to_unloaded() {
        let slot = EngineSlot::new();
        let source = CountingSource::new(50);

        let a = slot.load(source.clone(), LoaderOptions::default());
        let b = slot.load(source.clone(), LoaderOptions::default());
        a.cancel();
        b.cancel();
        b.cancel();

        assert!(b.wait().await.unwrap_err().is_cancelled());
        assert_eq!(settled(&slot).await, LoadState::Unloaded);
        assert!(slot.current().is_none());

        let c = slot.load(source.clone(), LoaderOptions::default());
        assert!(c.wait().await.is_ok());
        assert_eq!(slot.load_attempts(), 2);
    }

    #[tokio::test]
    async fn test_load_after_abort_starts_fresh_attempt() {
        let slot = EngineSlot::new();
        let source = CountingSource::new(20);

        let a = slot.load(source.clone(), LoaderOptions::default());
        a.cancel();
        let b = slot.load(source.clone(), LoaderOptions::default());

        assert!(a.wait().await.unwrap_err().is_cancelled());
        let engine = b.wait().await.unwrap();
        assert_eq!(slot.load_attempts(), 2);
        assert_eq!(settled(&slot).await, LoadState::Ready);
        assert!(Arc::ptr_eq(&engine, &slot.current().unwrap()));
    }

    #[tokio::test]
    async fn test_cancel_after_ready_is_noop() {
        let slot = EngineSlot::new();
        let pending = slot.load(CountingSource::new(0), LoaderOptions::default());
        let engine = pending.wait().await.unwrap();

        pending.cancel();
        assert!(Arc::ptr_eq(&engine, &pending.wait().await.unwrap()));
        assert!(slot.current().is_some());
    }

    #[tokio::test]
    async fn test_failure_is_published_and_retry_allowed() {
        let slot = EngineSlot::new();
        let source = CountingSource::failing();

        let err = slot
            .load(source.clone(), LoaderOptions::default())
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err, LoadError::Failed("network unreachable".to_string()));
        assert!(matches!(settled(&slot).await, LoadState::Failed(_)));

        let _ = slot.load(source.clone(), LoaderOptions::default()).wait().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_init_and_reset() {
        let slot = EngineSlot::new();
        let source = CountingSource::new(0);
        let engine = Arc::new(Engine::new("workers"));

        slot.init(Arc::clone(&engine));
        let loaded = slot
            .load(source.clone(), LoaderOptions::default())
            .wait()
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&engine, &loaded));
        assert_eq!(source.calls(), 0);

        let previous = slot.reset().unwrap();
        assert!(Arc::ptr_eq(&engine, &previous));
        assert_eq!(slot.state(), LoadState::Unloaded);
        assert!(slot.reset().is_none());
    }
}
