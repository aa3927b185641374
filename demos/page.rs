//! Renders a fake page inside one request scope and shows which memoized
//! calls actually run. Run with `RUST_LOG=reqmemo=trace` to see every hit.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqmemo::{ScopeError, current_scope, memoize, scoped};
use tracing_subscriber::EnvFilter;

// Fields are only shown through `Debug`.
#[allow(dead_code)]
#[derive(Debug, Clone)]
struct PricingModel {
    company: String,
    tier: &'static str,
    score: u64,
    computed_at: u128,
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
struct Profile {
    id: String,
    name: String,
    fetched_at: u128,
}

#[derive(Debug)]
struct Query {
    user: String,
}

#[derive(Debug, Clone, thiserror::Error)]
enum FetchError {
    #[error("user {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_micros())
}

/// Simulate expensive CPU work.
#[memoize]
fn pricing_model(company: &str, tier: &'static str) -> PricingModel {
    tracing::info!(company, tier, "computing pricing model");
    let mut score = 0;
    for i in 0..200_000 {
        score = (score + i) % 97;
    }
    PricingModel { company: company.into(), tier, score, computed_at: now() }
}

/// Simulate a slow user service.
#[memoize]
async fn user_profile(id: String) -> Result<Profile, FetchError> {
    tracing::info!(%id, "fetching user profile");
    tokio::time::sleep(Duration::from_millis(50)).await;
    if id.is_empty() {
        return Err(FetchError::NotFound(id));
    }
    Ok(Profile { name: format!("User {id}"), id, fetched_at: now() })
}

#[tokio::main]
async fn main() -> Result<(), FetchError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // Outside of any request: runs uncached.
    let outside = user_profile("1".into()).await?;
    println!("outside:  {outside:?}");

    let by_object = memoize(|(query,): (Arc<Query>,)| async move {
        Ok::<_, FetchError>((query.user.clone(), now()))
    });

    scoped(async {
        // Start the fetch early, then do other work.
        drop(user_profile("1".into()));

        let model_a = pricing_model("apd-001", "pro");
        let model_b = pricing_model("apd-001", "pro");
        println!("model A:  {model_a:?}");
        println!("model B:  {model_b:?}");

        let header = user_profile("1".into()).await?;
        let sidebar = user_profile("1".into()).await?;
        println!("header:   {header:?}");
        println!("sidebar:  {sidebar:?}");

        let q1 = Arc::new(Query { user: "1".into() });
        let q2 = Arc::new(Query { user: "1".into() });
        println!("object 1: {:?}", by_object.call_async((q1,)).await?);
        println!("object 2: {:?}", by_object.call_async((q2,)).await?);

        if let Some(scope) = current_scope() {
            println!("stats:    {:?}", scope.stats());
        }
        Ok::<_, FetchError>(())
    })
    .await
}
