use std::convert::Infallible;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::{self, BoxFuture, FutureExt};

use crate::bind::{current_scope, with_scope};
use crate::entry::{EntryState, MemoEntry};
use crate::error::ScopeError;
use crate::key::{Args, FuncId, derive_key};

/// The identity and name of a memoized function.
///
/// The identity is assigned lazily on first use, so a site can live in a
/// `static`.
pub struct FnSite {
    name: &'static str,
    id: OnceLock<FuncId>,
}

impl FnSite {
    /// Create a site for the function with the given name.
    pub const fn new(name: &'static str) -> Self {
        Self { name, id: OnceLock::new() }
    }

    /// The function's identity.
    pub fn id(&self) -> FuncId {
        *self.id.get_or_init(FuncId::next)
    }

    /// The function's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Executes a synchronous function, trying to use a memoized result for it.
///
/// # Panics
/// Panics if the current scope was already closed. Use [`memoized_try`] to
/// handle that case as an error.
pub fn memoized<A, T, F>(site: &FnSite, args: A, func: F) -> T
where
    A: Args,
    T: Clone + Send + Sync + 'static,
    F: FnOnce(A) -> T,
{
    match run_sync(site, args, |args| Ok::<_, Infallible>(func(args))) {
        Ok(Ok(value)) => value,
        Ok(Err(never)) => match never {},
        Err(err) => panic!("reqmemo: cannot call `{}`: {err}", site.name()),
    }
}

/// Executes a fallible synchronous function, trying to use a memoized result
/// for it.
///
/// Failures are memoized just like values.
pub fn memoized_try<A, T, E, F>(site: &FnSite, args: A, func: F) -> Result<T, E>
where
    A: Args,
    T: Clone + Send + Sync + 'static,
    E: Clone + From<ScopeError> + Send + Sync + 'static,
    F: FnOnce(A) -> Result<T, E>,
{
    run_sync(site, args, func).unwrap_or_else(|err| Err(err.into()))
}

fn run_sync<A, T, E, F>(site: &FnSite, args: A, func: F) -> Result<Result<T, E>, ScopeError>
where
    A: Args,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: FnOnce(A) -> Result<T, E>,
{
    // Outside of a request there is nothing to memoize into.
    let Some(scope) = current_scope() else {
        tracing::trace!(function = site.name(), "bypass");
        return Ok(func(args));
    };

    let key = derive_key(site.id(), &args);
    let (entry, _) = scope.lookup_or_create(key, MemoEntry::sync)?;

    // The scope's lock is released at this point, so the function may call
    // other memoized functions.
    let mut executed = false;
    let outcome = entry
        .get_or_init(|| {
            executed = true;
            tracing::debug!(function = site.name(), scope = scope.id(), "executing");
            func(args)
        })
        .unwrap_or_else(|| panic!("reqmemo: `{}` is memoized as async", site.name()));

    if executed {
        scope.register_miss();
        tracing::trace!(function = site.name(), scope = scope.id(), "miss");
    } else {
        scope.register_hit();
        tracing::trace!(function = site.name(), scope = scope.id(), "hit");
    }

    Ok(outcome)
}

/// Executes an asynchronous function, trying to use a memoized result for it.
///
/// The work is registered in the current scope right away and, when a Tokio
/// runtime is available, spawned onto it, so it makes progress even if the
/// returned future is never polled. Every caller with the same key awaits the
/// same computation. Outside of a scope the work is spawned the same way but
/// nothing is shared.
pub fn memoized_async<A, T, E, F, Fut>(
    site: &FnSite,
    args: A,
    func: F,
) -> BoxFuture<'static, Result<T, E>>
where
    A: Args + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + From<ScopeError> + Send + Sync + 'static,
    F: FnOnce(A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let name = site.name();
    let Some(scope) = current_scope() else {
        tracing::trace!(function = name, "bypass");
        let work = func(args).boxed();
        // Uncached, but started just as eagerly as inside a scope.
        return match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let work = work.shared();
                drop(runtime.spawn(work.clone()));
                work.boxed()
            }
            Err(_) => work,
        };
    };

    let key = derive_key(site.id(), &args);
    let weak = scope.downgrade();
    let found = scope.insert_or_get(key, move || {
        // Runs under the scope's lock: only assemble the future here. The
        // function itself is first called when the computation is polled.
        let work = async move {
            let Some(scope) = weak.upgrade() else {
                return Err(E::from(ScopeError::ScopeClosed));
            };
            tracing::debug!(function = name, scope = scope.id(), "executing");
            with_scope(&scope, async move { func(args).await }).await
        };
        let (work, handle) = future::abortable(work);
        let computation = work
            .map(|result| result.unwrap_or_else(|_| Err(E::from(ScopeError::ScopeClosed))))
            .boxed()
            .shared();
        (MemoEntry::pending(computation), Some(handle))
    });

    let (entry, created) = match found {
        Ok(found) => found,
        Err(err) => return future::ready(Err(E::from(err))).boxed(),
    };

    let computation = entry
        .computation()
        .unwrap_or_else(|| panic!("reqmemo: `{name}` is memoized as sync"));

    if created {
        scope.register_miss();
        tracing::trace!(function = name, scope = scope.id(), "miss");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            drop(runtime.spawn(computation.clone()));
        }
    } else {
        scope.register_hit();
        match entry.state() {
            EntryState::Pending => tracing::trace!(function = name, scope = scope.id(), "join"),
            _ => tracing::trace!(function = name, scope = scope.id(), "hit"),
        }
    }

    computation.boxed()
}

/// A memoized function.
///
/// Created with [`memoize`]. Calls made while a scope is bound share results
/// with all other calls with equal arguments in that scope; calls made
/// outside of a scope always run the function.
pub struct Memoized<F> {
    site: FnSite,
    func: Arc<F>,
}

/// Wrap a function so that its calls are memoized per request.
///
/// The function receives its arguments as a tuple. See [`Args`].
pub fn memoize<F>(func: F) -> Memoized<F> {
    Memoized::named(std::any::type_name::<F>(), func)
}

impl<F> Memoized<F> {
    /// Wrap a function and give it a name for logging.
    pub fn named(name: &'static str, func: F) -> Self {
        let site = FnSite { name, id: OnceLock::from(FuncId::next()) };
        Self { site, func: Arc::new(func) }
    }

    /// The function's identity.
    pub fn id(&self) -> FuncId {
        self.site.id()
    }

    /// The function's name.
    pub fn name(&self) -> &'static str {
        self.site.name()
    }

    /// Call a synchronous function.
    ///
    /// # Panics
    /// Panics if the current scope was already closed.
    pub fn call<A, T>(&self, args: A) -> T
    where
        F: Fn(A) -> T,
        A: Args,
        T: Clone + Send + Sync + 'static,
    {
        memoized(&self.site, args, |args| (*self.func)(args))
    }

    /// Call a fallible synchronous function.
    pub fn try_call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        A: Args,
        T: Clone + Send + Sync + 'static,
        E: Clone + From<ScopeError> + Send + Sync + 'static,
    {
        memoized_try(&self.site, args, |args| (*self.func)(args))
    }

    /// Call an asynchronous function.
    ///
    /// The call starts right away; awaiting the returned future only waits
    /// for its outcome.
    pub fn call_async<A, T, E, Fut>(&self, args: A) -> BoxFuture<'static, Result<T, E>>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: Args + Send + 'static,
        T: Clone + Send + Sync + 'static,
        E: Clone + From<ScopeError> + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let func = Arc::clone(&self.func);
        memoized_async(&self.site, args, move |args| (*func)(args))
    }

    /// Start an asynchronous call without waiting for it.
    ///
    /// See [`preload`](crate::preload).
    pub fn preload<A, T, E, Fut>(&self, args: A)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: Args + Send + 'static,
        T: Clone + Send + Sync + 'static,
        E: Clone + From<ScopeError> + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        crate::preload(self, args);
    }
}

impl<F> Debug for Memoized<F> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("name", &self.site.name())
            .field("id", &self.site.id())
            .finish()
    }
}
