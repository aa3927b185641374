use reqmemo::{Scope, memoize, with_scope_sync};

#[test]
fn test_simple() {
    let scope = Scope::open();
    with_scope_sync(&scope, || {
        empty(); // [Miss] The scope is empty.
        empty(); // [Hit] Always a hit from now on.
        empty(); // [Hit] Always a hit from now on.

        double(2); // [Miss] The scope is empty.
        double(4); // [Miss] Different number.
        double(2); // [Hit] Same number as initially.

        sum(2, 4); // [Miss] The scope is empty.
        sum(2, 3); // [Miss] Different numbers.
        sum(2, 3); // [Hit]  Same numbers
        sum(4, 2); // [Miss] Different numbers.
    });

    let stats = scope.stats();
    assert_eq!(stats.misses, 6);
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.entries, 6);
}

/// Build a string.
#[memoize]
fn empty() -> String {
    format!("The world is {}", "big")
}

/// Double a number.
#[memoize]
fn double(x: u32) -> u32 {
    2 * x
}

/// Compute the sum of two numbers.
#[memoize]
fn sum(a: u32, b: u32) -> u32 {
    a + b
}
