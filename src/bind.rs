use std::future::Future;

use futures::future::Either;
use tokio::task::futures::TaskLocalFuture;

use crate::scope::Scope;

tokio::task_local! {
    /// The scope of the request the current task works on.
    static CURRENT: Scope;
}

/// The scope bound to the currently executing code, if any.
///
/// Returns `None` outside of [`with_scope`] and [`with_scope_sync`], for
/// example in code that runs at process start-up or on a task that was
/// spawned without [`propagate`].
pub fn current_scope() -> Option<Scope> {
    CURRENT.try_with(Scope::clone).ok()
}

/// Run a future with `scope` as the current scope.
///
/// The binding holds for every poll of the future, so it follows the future's
/// whole logical continuation and not just its synchronous prologue. The
/// previous binding is restored whenever the future yields, completes, panics
/// or is dropped.
pub fn with_scope<F>(scope: &Scope, future: F) -> TaskLocalFuture<Scope, F>
where
    F: Future,
{
    CURRENT.scope(scope.clone(), future)
}

/// Run a closure with `scope` as the current scope.
pub fn with_scope_sync<F, R>(scope: &Scope, f: F) -> R
where
    F: FnOnce() -> R,
{
    CURRENT.sync_scope(scope.clone(), f)
}

/// Carry the current scope over to a future that will run elsewhere.
///
/// Use this when handing request work to `tokio::spawn` or a similar
/// executor: the spawned future observes the same scope as the code that
/// created it. Outside of a scope the future is returned unchanged.
pub fn propagate<F>(future: F) -> Either<TaskLocalFuture<Scope, F>, F>
where
    F: Future,
{
    match current_scope() {
        Some(scope) => Either::Left(CURRENT.scope(scope, future)),
        None => Either::Right(future),
    }
}

/// Run a request: open a scope, bind it to `future` and close it afterwards.
///
/// The scope is closed even if the future panics or is dropped before it
/// completes.
pub async fn scoped<F>(future: F) -> F::Output
where
    F: Future,
{
    let scope = Scope::open();
    let _guard = CloseOnDrop(scope.clone());
    with_scope(&scope, future).await
}

/// Closes a scope when dropped.
struct CloseOnDrop(Scope);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}
