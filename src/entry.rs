use std::sync::OnceLock;

use futures::future::{BoxFuture, Shared};

/// An asynchronous computation that every caller of the same key can await.
pub type Computation<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// The observable state of a memoized call.
#[derive(Debug, PartialEq, Eq)]
pub enum EntryState<'a, T, E> {
    /// The work was started but has not finished yet.
    Pending,
    /// The work produced a value.
    Resolved(&'a T),
    /// The work failed.
    Rejected(&'a E),
}

/// A memoized result.
///
/// Owned by the scope that created it. Settles exactly once and stays settled
/// for the rest of the scope's life.
pub struct MemoEntry<T, E> {
    slot: Slot<T, E>,
}

enum Slot<T, E> {
    /// Filled by whichever caller runs the synchronous work first.
    Sync(OnceLock<Result<T, E>>),
    /// Shared handle on the in-flight or finished asynchronous work.
    Async(Computation<T, E>),
}

impl<T, E> MemoEntry<T, E> {
    /// Create an entry for synchronous work that has not run yet.
    pub fn sync() -> Self {
        Self { slot: Slot::Sync(OnceLock::new()) }
    }

    /// Create an entry tracking an asynchronous computation.
    pub fn pending(computation: Computation<T, E>) -> Self {
        Self { slot: Slot::Async(computation) }
    }
}

impl<T: Clone, E: Clone> MemoEntry<T, E> {
    /// The current state of the entry.
    pub fn state(&self) -> EntryState<'_, T, E> {
        let outcome = match &self.slot {
            Slot::Sync(cell) => cell.get(),
            Slot::Async(computation) => computation.peek(),
        };

        match outcome {
            None => EntryState::Pending,
            Some(Ok(value)) => EntryState::Resolved(value),
            Some(Err(error)) => EntryState::Rejected(error),
        }
    }

    /// Whether the entry has settled.
    pub fn is_settled(&self) -> bool {
        !matches!(self.state(), EntryState::Pending)
    }

    /// Return the outcome, running `init` if nobody ran the work yet.
    ///
    /// Concurrent callers block until the running caller is done. Returns
    /// `None` for asynchronous entries.
    pub(crate) fn get_or_init<F>(&self, init: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        match &self.slot {
            Slot::Sync(cell) => Some(cell.get_or_init(init).clone()),
            Slot::Async(_) => None,
        }
    }

    /// A handle on the asynchronous computation. Returns `None` for
    /// synchronous entries.
    pub(crate) fn computation(&self) -> Option<Computation<T, E>> {
        match &self.slot {
            Slot::Sync(_) => None,
            Slot::Async(computation) => Some(computation.clone()),
        }
    }
}
