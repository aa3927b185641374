use std::future::Future;

use crate::error::ScopeError;
use crate::key::Args;
use crate::memoize::Memoized;

/// Start a memoized asynchronous call without waiting for its result.
///
/// The call is registered in the current scope exactly as if it had been
/// awaited, so a later call with the same arguments joins it instead of
/// starting a second execution. Its outcome, including any failure, is only
/// observed by such later calls.
///
/// ```
/// # use reqmemo::{memoize, preload, scoped, ScopeError};
/// # async fn fetch(id: String) -> Result<String, ScopeError> { Ok(id) }
/// # async fn example() {
/// let report = memoize(|(id,): (String,)| fetch(id));
/// scoped(async {
///     preload(&report, ("1".to_string(),));
///     // ... other work while the report loads ...
///     let report = report.call_async(("1".to_string(),)).await;
///     # let _ = report;
/// })
/// .await;
/// # }
/// ```
pub fn preload<F, A, T, E, Fut>(memoized: &Memoized<F>, args: A)
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: Args + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + From<ScopeError> + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    tracing::trace!(function = memoized.name(), "preload");
    drop(memoized.call_async(args));
}
