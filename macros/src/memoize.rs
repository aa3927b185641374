use super::*;

/// Memoize a function.
pub fn expand(mut func: syn::ItemFn) -> Result<proc_macro2::TokenStream> {
    // A static site is shared by all instantiations of a generic function.
    for param in &func.sig.generics.params {
        if !matches!(param, syn::GenericParam::Lifetime(_)) {
            bail!(param, "generic functions are not supported")
        }
    }

    let mut args = vec![];
    for input in &func.sig.inputs {
        let typed = match input {
            syn::FnArg::Typed(typed) => typed,
            syn::FnArg::Receiver(_) => {
                bail!(input, "methods are not supported")
            }
        };

        let name = match typed.pat.as_ref() {
            syn::Pat::Ident(syn::PatIdent {
                by_ref: None,
                mutability: None,
                ident,
                subpat: None,
                ..
            }) => ident,
            pat => bail!(pat, "only simple identifiers are supported"),
        };

        args.push(name.clone());
    }

    // Construct a tuple from all arguments.
    let arg_tuple = quote! { (#(#args,)*) };

    let body = &func.block;
    let name = func.sig.ident.to_string();
    let site = quote! {
        static __SITE: ::reqmemo::internal::FnSite =
            ::reqmemo::internal::FnSite::new(#name);
    };

    if func.sig.asyncness.is_some() {
        let output = match &func.sig.output {
            syn::ReturnType::Type(_, ty) => ty.clone(),
            syn::ReturnType::Default => {
                bail!(func.sig, "async functions must return a `Result`")
            }
        };

        // Turn the `async fn` into a plain function returning the eagerly
        // started computation.
        func.sig.asyncness = None;
        func.sig.output = parse_quote! {
            -> ::reqmemo::internal::BoxFuture<'static, #output>
        };
        func.block = parse_quote! { {
            #site
            ::reqmemo::internal::memoized_async(
                &__SITE,
                #arg_tuple,
                move |#arg_tuple| async move #body,
            )
        } };
    } else {
        func.block = parse_quote! { {
            #site
            ::reqmemo::internal::memoized(
                &__SITE,
                #arg_tuple,
                |#arg_tuple| #body,
            )
        } };
    }

    Ok(quote! { #func })
}
