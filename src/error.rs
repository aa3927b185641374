use thiserror::Error;

/// Misuse of a request scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// A direct scope operation ran outside of any request boundary.
    #[error("no request scope is bound to the current task")]
    NoCurrentScope,
    /// The scope was already closed at the end of its request.
    #[error("the request scope was already closed")]
    ScopeClosed,
}
