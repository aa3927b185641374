extern crate proc_macro;

macro_rules! bail {
    ($item:expr, $fmt:literal $($tts:tt)*) => {
        return Err(Error::new_spanned(
            &$item,
            format!(concat!("reqmemo: ", $fmt) $($tts)*)
        ))
    }
}

mod memoize;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Error, Result, parse_quote};

/// Memoize a function per request.
///
/// While a request scope is bound, calls with equal arguments share one
/// execution. Arguments must implement `reqmemo::Arg`.
///
/// ```ignore
/// #[memoize]
/// fn pricing(company: &str, pro: bool) -> u64 {
///     company.len() as u64 * if pro { 10 } else { 1 }
/// }
/// ```
///
/// An `async fn` must return a `Result` whose error type implements
/// `From<reqmemo::ScopeError>`. It is turned into a plain function that starts
/// the work right away and returns a boxed future. Not awaiting that future
/// preloads the call.
///
/// ```ignore
/// #[memoize]
/// async fn profile(id: String) -> Result<String, ScopeError> {
///     Ok(format!("user {id}"))
/// }
/// ```
#[proc_macro_attribute]
pub fn memoize(_: TokenStream, stream: TokenStream) -> TokenStream {
    let func = syn::parse_macro_input!(stream as syn::ItemFn);
    memoize::expand(func)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
