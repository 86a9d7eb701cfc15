//! Resource-release handles
//!
//! Every plugin install, worker registration and lifecycle callback hands back
//! a [`Disposable`]. Disposing is idempotent; aggregates release their
//! children last-in-first-out.

use std::fmt;
use std::sync::{Arc, Mutex};

type Release = Box<dyn FnOnce() + Send>;

/// Idempotent release handle. Clones share the same release action.
#[derive(Clone, Default)]
pub struct Disposable {
    release: Arc<Mutex<Option<Release>>>,
}

impl Disposable {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// Handle with nothing to release
    pub fn none() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        let release = match self.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        match self.release.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Anything [`as_disposable`] accepts
pub enum DisposeTarget {
    None,
    One(Disposable),
    Many(Vec<Disposable>),
}

impl From<Disposable> for DisposeTarget {
    fn from(d: Disposable) -> Self {
        Self::One(d)
    }
}

impl From<Option<Disposable>> for DisposeTarget {
    fn from(d: Option<Disposable>) -> Self {
        d.map_or(Self::None, Self::One)
    }
}

impl From<Vec<Disposable>> for DisposeTarget {
    fn from(d: Vec<Disposable>) -> Self {
        Self::Many(d)
    }
}

impl From<()> for DisposeTarget {
    fn from(_: ()) -> Self {
        Self::None
    }
}

/// Wrap a single handle, a sequence of handles, or nothing into one handle.
pub fn as_disposable(target: impl Into<DisposeTarget>) -> Disposable {
    match target.into() {
        DisposeTarget::None => Disposable::none(),
        DisposeTarget::One(d) => d,
        DisposeTarget::Many(mut list) => Disposable::new(move || dispose_all(&mut list)),
    }
}

/// Release entries last-in-first-out, removing each before it runs.
pub fn dispose_all(disposables: &mut Vec<Disposable>) {
    while let Some(d) = disposables.pop() {
        d.dispose();
    }
}

/// Shared LIFO stack of handles
#[derive(Clone, Default)]
pub struct DisposableStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    items: Vec<Disposable>,
    disposed: bool,
}

impl DisposableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle. A store that was already disposed releases it at once.
    pub fn push(&self, d: Disposable) {
        let late = {
            let mut state = self.lock();
            if state.disposed {
                Some(d)
            } else {
                state.items.push(d);
                None
            }
        };
        if let Some(d) = late {
            d.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispose(&self) {
        self.lock().disposed = true;
        // Pop one at a time so a release that re-enters the store cannot deadlock.
        loop {
            let next = self.lock().items.pop();
            match next {
                Some(d) => d.dispose(),
                None => break,
            }
        }
    }

    pub fn into_disposable(self) -> Disposable {
        Disposable::new(move || self.dispose())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for DisposableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DisposableStore")
            .field("pending", &state.items.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
