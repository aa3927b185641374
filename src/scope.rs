use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::AbortHandle;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::bind::current_scope;
use crate::entry::MemoEntry;
use crate::error::ScopeError;
use crate::key::CacheKey;

/// A type-erased `Arc<MemoEntry<T, E>>`.
type ErasedEntry = Arc<dyn Any + Send + Sync>;

/// The memoization cache of one logical request.
///
/// Cloning a scope yields another handle to the same cache. A scope is opened
/// when a request starts, bound to the request's work with
/// [`with_scope`](crate::with_scope) and closed when the request ends, at the
/// latest when the last handle to it is dropped. Entries never outlive their
/// scope and are never shared with another one.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
    /// `None` for the handles the scope's own computations run with, so that
    /// they do not keep the scope open.
    _owner: Option<Arc<Owner>>,
}

/// Closes the scope once every handle outside of its computations is gone.
struct Owner(Arc<Inner>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.close();
    }
}

struct Inner {
    /// Unique per scope, used in logs.
    id: u64,
    /// The entries, plus everything that must be torn down on close.
    state: Mutex<State>,
    /// Calls that were answered by an existing entry.
    hits: AtomicUsize,
    /// Calls that executed the underlying function.
    misses: AtomicUsize,
}

struct State {
    /// Maps from function identity and arguments to memoized results.
    /// `None` once the scope is closed.
    entries: Option<FxHashMap<CacheKey, ErasedEntry>>,
    /// Handles to abort asynchronous computations started in this scope.
    inflight: Vec<AbortHandle>,
}

/// Counters of a scope.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ScopeStats {
    /// Calls that were answered by an existing entry.
    pub hits: usize,
    /// Calls that executed the underlying function.
    pub misses: usize,
    /// Entries currently held by the scope.
    pub entries: usize,
}

impl Scope {
    /// Open a new, empty scope.
    ///
    /// The scope is not bound to anything yet; see
    /// [`with_scope`](crate::with_scope).
    pub fn open() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(scope = id, "opened request scope");
        let inner = Arc::new(Inner {
            id,
            state: Mutex::new(State {
                entries: Some(FxHashMap::default()),
                inflight: Vec::new(),
            }),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        });
        let owner = Arc::new(Owner(Arc::clone(&inner)));
        Self { inner, _owner: Some(owner) }
    }

    /// The scope's id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Look up the entry for `key`, creating it with `init` if there is none.
    ///
    /// The second tuple element is `true` for exactly one caller per key: the
    /// one whose `init` created the entry. All others receive that same entry.
    pub fn lookup_or_create<T, E, F>(
        &self,
        key: CacheKey,
        init: F,
    ) -> Result<(Arc<MemoEntry<T, E>>, bool), ScopeError>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnOnce() -> MemoEntry<T, E>,
    {
        self.insert_or_get(key, || (init(), None))
    }

    /// Like [`lookup_or_create`](Self::lookup_or_create), but `init` may also
    /// hand over an abort handle that is triggered when the scope closes.
    pub(crate) fn insert_or_get<T, E, F>(
        &self,
        key: CacheKey,
        init: F,
    ) -> Result<(Arc<MemoEntry<T, E>>, bool), ScopeError>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnOnce() -> (MemoEntry<T, E>, Option<AbortHandle>),
    {
        let mut state = self.inner.state.lock();
        let State { entries, inflight } = &mut *state;
        let entries = entries.as_mut().ok_or(ScopeError::ScopeClosed)?;

        if let Some(entry) = entries.get(&key) {
            let entry = Arc::clone(entry)
                .downcast::<MemoEntry<T, E>>()
                .unwrap_or_else(|_| panic!("reqmemo: wrong entry type for {key:?}"));
            return Ok((entry, false));
        }

        let (entry, abort) = init();
        let entry = Arc::new(entry);
        entries.insert(key, Arc::clone(&entry) as ErasedEntry);
        inflight.extend(abort);
        Ok((entry, true))
    }

    /// Close the scope.
    ///
    /// Drops all entries and aborts computations that are still running, so
    /// that everybody waiting on them fails with
    /// [`ScopeError::ScopeClosed`]. Closing twice is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether the scope was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().entries.is_none()
    }

    /// The number of entries in the scope.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.as_ref().map_or(0, |entries| entries.len())
    }

    /// Whether the scope holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scope's counters.
    pub fn stats(&self) -> ScopeStats {
        ScopeStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Whether two handles refer to the same scope.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn register_hit(&self) {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn register_miss(&self) {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.inner))
    }
}

impl Inner {
    fn close(&self) {
        let (entries, inflight) = {
            let mut state = self.state.lock();
            (state.entries.take(), std::mem::take(&mut state.inflight))
        };

        let Some(entries) = entries else { return };
        for handle in &inflight {
            handle.abort();
        }

        tracing::debug!(
            scope = self.id,
            entries = entries.len(),
            aborted = inflight.len(),
            hits = self.hits.load(Ordering::Relaxed),
            misses = self.misses.load(Ordering::Relaxed),
            "closed request scope"
        );

        // Entries may hold arbitrary user values, drop them outside the lock.
        drop(entries);
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A handle that does not keep the scope alive.
///
/// Held by computations stored inside the scope itself.
#[derive(Clone)]
pub(crate) struct WeakScope(Weak<Inner>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner, _owner: None })
    }
}

/// Open a new request scope.
pub fn open_scope() -> Scope {
    Scope::open()
}

/// Close a request scope.
pub fn close_scope(scope: &Scope) {
    scope.close();
}

/// Look up or create an entry in the scope bound to the current task.
///
/// Fails with [`ScopeError::NoCurrentScope`] outside of a request.
pub fn lookup_or_create<T, E, F>(
    key: CacheKey,
    init: F,
) -> Result<(Arc<MemoEntry<T, E>>, bool), ScopeError>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnOnce() -> MemoEntry<T, E>,
{
    current_scope().ok_or(ScopeError::NoCurrentScope)?.lookup_or_create(key, init)
}
