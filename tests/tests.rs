//! Run with `cargo test --all-features`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use reqmemo::{
    CacheKey, EntryState, FuncId, MemoEntry, Scope, ScopeError, current_scope, derive_key,
    lookup_or_create, memoize, with_scope_sync,
};

macro_rules! test {
    ($scope:ident, miss: $call:expr, $result:expr) => {{
        let before = $scope.stats();
        assert_eq!($call, $result);
        let after = $scope.stats();
        assert_eq!(after.misses, before.misses + 1, "expected a miss");
        assert_eq!(after.hits, before.hits);
    }};
    ($scope:ident, hit: $call:expr, $result:expr) => {{
        let before = $scope.stats();
        assert_eq!($call, $result);
        let after = $scope.stats();
        assert_eq!(after.hits, before.hits + 1, "expected a hit");
        assert_eq!(after.misses, before.misses);
    }};
}

/// Test basic memoization.
#[test]
fn test_basic() {
    #[memoize]
    fn empty() -> String {
        format!("The world is {}", "big")
    }

    #[memoize]
    fn double(x: u32) -> u32 {
        2 * x
    }

    #[memoize]
    fn sum(a: u32, b: u32) -> u32 {
        a + b
    }

    #[memoize]
    fn fib(n: u32) -> u32 {
        if n <= 2 { 1 } else { fib(n - 1) + fib(n - 2) }
    }

    #[memoize]
    fn greet(name: &str, loud: bool) -> String {
        if loud { format!("HELLO {}!", name.to_uppercase()) } else { format!("Hello {name}") }
    }

    let scope = Scope::open();
    with_scope_sync(&scope, || {
        test!(scope, miss: empty(), "The world is big");
        test!(scope, hit: empty(), "The world is big");
        test!(scope, hit: empty(), "The world is big");

        test!(scope, miss: double(2), 4);
        test!(scope, miss: double(4), 8);
        test!(scope, hit: double(2), 4);

        test!(scope, miss: sum(2, 4), 6);
        test!(scope, miss: sum(2, 3), 5);
        test!(scope, hit: sum(2, 3), 5);
        test!(scope, miss: sum(4, 2), 6);

        test!(scope, miss: greet("ada", false), "Hello ada");
        test!(scope, hit: greet(&String::from("ada"), false), "Hello ada");
        test!(scope, miss: greet("ada", true), "HELLO ADA!");
    });

    // Nested memoized calls run while the outer call is still executing.
    with_scope_sync(&scope, || {
        assert_eq!(fib(20), 6765);
        assert_eq!(scope.stats().entries, 8 + 20);
        test!(scope, hit: fib(19), 4181);
    });
}

/// Two calls with equal arguments share one execution and its result.
#[test]
fn test_dedup_by_key() {
    let runs = AtomicUsize::new(0);
    let pricing = memoize(|(company, tier): (&str, &str)| {
        runs.fetch_add(1, Ordering::SeqCst);
        let mut score = 0u64;
        for i in 0..200_000u64 {
            score = (score + i) % 97;
        }
        (format!("{company}/{tier}"), score)
    });

    let scope = Scope::open();
    let (a, b) = with_scope_sync(&scope, || {
        (pricing.call(("apd-001", "pro")), pricing.call(("apd-001", "pro")))
    });

    assert_eq!(a, b);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(scope.len(), 1);
}

/// Different memoized functions never share entries.
#[test]
fn test_distinct_functions() {
    let twice = memoize(|(x,): (i64,)| x * 2);
    let thrice = memoize(|(x,): (i64,)| x * 3);
    assert_ne!(twice.id(), thrice.id());

    let scope = Scope::open();
    with_scope_sync(&scope, || {
        test!(scope, miss: twice.call((7,)), 14);
        test!(scope, miss: thrice.call((7,)), 21);
        test!(scope, hit: twice.call((7,)), 14);
    });
}

/// Non-primitive arguments are compared by identity, not by structure.
#[test]
fn test_identity_arguments() {
    #[derive(Debug, PartialEq)]
    struct Query {
        user: String,
    }

    let runs = AtomicUsize::new(0);
    let lookup = memoize(|(query,): (Arc<Query>,)| {
        runs.fetch_add(1, Ordering::SeqCst);
        query.user.clone()
    });

    let scope = Scope::open();
    with_scope_sync(&scope, || {
        let q1 = Arc::new(Query { user: "1".into() });
        let q2 = Arc::new(Query { user: "1".into() });
        assert_eq!(q1, q2);

        test!(scope, miss: lookup.call((Arc::clone(&q1),)), "1");
        test!(scope, miss: lookup.call((Arc::clone(&q2),)), "1");
        test!(scope, hit: lookup.call((q1,)), "1");
    });

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Scopes never share entries.
#[test]
fn test_scope_isolation() {
    let runs = AtomicUsize::new(0);
    let square = memoize(|(x,): (u8,)| {
        runs.fetch_add(1, Ordering::SeqCst);
        u32::from(x) * u32::from(x)
    });

    let first = Scope::open();
    let second = Scope::open();
    assert!(!first.ptr_eq(&second));

    with_scope_sync(&first, || test!(first, miss: square.call((9,)), 81));
    with_scope_sync(&second, || test!(second, miss: square.call((9,)), 81));
    with_scope_sync(&first, || test!(first, hit: square.call((9,)), 81));

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Calls outside of a scope always execute.
#[test]
fn test_outside_scope() {
    let runs = AtomicUsize::new(0);
    let id = memoize(|(x,): (char,)| {
        runs.fetch_add(1, Ordering::SeqCst);
        x
    });

    assert!(current_scope().is_none());
    assert_eq!(id.call(('a',)), 'a');
    assert_eq!(id.call(('a',)), 'a');
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // Threads spawned from inside a scope have no causal link to it.
    let scope = Scope::open();
    with_scope_sync(&scope, || {
        thread::scope(|s| {
            s.spawn(|| {
                assert!(current_scope().is_none());
                id.call(('a',));
            });
        });
    });
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(scope.is_empty());
}

/// The binding is restored after the body, even if it panics.
#[test]
fn test_binding_restored() {
    let scope = Scope::open();
    with_scope_sync(&scope, || {
        let inner = current_scope().expect("scope is bound");
        assert!(inner.ptr_eq(&scope));
    });
    assert!(current_scope().is_none());

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        with_scope_sync(&scope, || panic!("request failed"));
    }));
    assert!(result.is_err());
    assert!(current_scope().is_none());
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum ParseError {
    #[error("invalid number: {0}")]
    Invalid(String),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Failures are memoized and never retried within a scope.
#[test]
fn test_failure_caching() {
    let runs = AtomicUsize::new(0);
    let parse = memoize(|(text,): (String,)| {
        runs.fetch_add(1, Ordering::SeqCst);
        text.parse::<i32>().map_err(|_| ParseError::Invalid(text))
    });

    let scope = Scope::open();
    with_scope_sync(&scope, || {
        let expected = Err(ParseError::Invalid("x".into()));
        test!(scope, miss: parse.try_call(("x".to_string(),)), expected.clone());
        test!(scope, hit: parse.try_call(("x".to_string(),)), expected);
        test!(scope, miss: parse.try_call(("12".to_string(),)), Ok(12));
    });
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // A fresh request gets a fresh attempt.
    let retry = Scope::open();
    with_scope_sync(&retry, || {
        assert!(parse.try_call(("x".to_string(),)).is_err());
    });
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// Closed scopes reject further use.
#[test]
fn test_closed_scope() {
    let parse = memoize(|(text,): (&str,)| {
        text.parse::<i32>().map_err(|_| ParseError::Invalid(text.into()))
    });

    let scope = Scope::open();
    with_scope_sync(&scope, || assert_eq!(parse.try_call(("1",)), Ok(1)));
    assert_eq!(scope.len(), 1);

    scope.close();
    assert!(scope.is_closed());
    assert!(scope.is_empty());
    scope.close();

    with_scope_sync(&scope, || {
        assert_eq!(parse.try_call(("1",)), Err(ParseError::Scope(ScopeError::ScopeClosed)));
    });

    let key = derive_key(FuncId::next(), &(1u8,));
    let result = scope.lookup_or_create(key, MemoEntry::<u8, ()>::sync);
    assert!(matches!(result, Err(ScopeError::ScopeClosed)));
}

/// An infallible call on a closed scope is a programmer error.
#[test]
#[should_panic(expected = "already closed")]
fn test_closed_scope_panics() {
    let double = memoize(|(x,): (u32,)| x * 2);
    let scope = Scope::open();
    scope.close();
    with_scope_sync(&scope, || double.call((1,)));
}

/// The direct lookup API needs a bound scope.
#[test]
fn test_direct_lookup() {
    let key = || derive_key(FuncId::next(), &("k",));
    let result = lookup_or_create(key(), MemoEntry::<String, ()>::sync);
    assert!(matches!(result, Err(ScopeError::NoCurrentScope)));

    let scope = Scope::open();
    with_scope_sync(&scope, || {
        let key: CacheKey = key();
        let (first, created) =
            lookup_or_create(key.clone(), MemoEntry::<String, ()>::sync).unwrap();
        assert!(created);
        assert_eq!(first.state(), EntryState::Pending);

        let (second, created) =
            lookup_or_create(key, MemoEntry::<String, ()>::sync).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    });
}

/// Concurrent threads in the same request share one execution.
#[test]
fn test_concurrent_threads() {
    let runs = AtomicUsize::new(0);
    let slow = memoize(|(x,): (u64,)| {
        runs.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        x + 1
    });

    let scope = Scope::open();
    thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| with_scope_sync(&scope, || slow.call((41,)))))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
    });

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(scope.stats().misses, 1);
    assert_eq!(scope.stats().hits, 7);
}
