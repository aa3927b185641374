//! Request-scoped memoization.
//!
//! Deduplicates computations and asynchronous fetches within one logical
//! request: while a [`Scope`] is bound, all calls of a memoized function with
//! equal arguments share a single execution and its result, or its in-flight
//! future. Outside of a scope, memoized functions simply run.
//!
//! ```
//! use reqmemo::{memoize, scoped};
//!
//! # async fn example() {
//! let double = memoize(|(x,): (u32,)| 2 * x);
//!
//! scoped(async {
//!     assert_eq!(double.call((2,)), 4); // Executes.
//!     assert_eq!(double.call((2,)), 4); // Shared with the call above.
//! })
//! .await;
//! # }
//! ```
//!
//! Arguments are compared shallowly: primitives and strings by value, `Arc`s
//! by address. Two separately built `Arc`s with equal contents are different
//! arguments.

mod bind;
mod entry;
mod error;
mod key;
mod memoize;
mod preload;
mod scope;

pub use crate::bind::{current_scope, propagate, scoped, with_scope, with_scope_sync};
pub use crate::entry::{EntryState, MemoEntry};
pub use crate::error::ScopeError;
pub use crate::key::{Arg, ArgKey, Args, CacheKey, FuncId, Identity, derive_key};
pub use crate::memoize::{Memoized, memoize};
pub use crate::preload::preload;
pub use crate::scope::{Scope, ScopeStats, close_scope, lookup_or_create, open_scope};

#[cfg(feature = "macros")]
pub use reqmemo_macros::memoize;

/// These are implementation details. Do not rely on them!
#[doc(hidden)]
pub mod internal {
    pub use futures::future::BoxFuture;

    pub use crate::memoize::{FnSite, memoized, memoized_async};
}
