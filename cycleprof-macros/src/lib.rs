//! Proc macros for cycleprof.
//!
//! This crate provides the `#[profile]` attribute, which wraps a function
//! body in a profiling scope.
//!
//! See the `cycleprof` crate documentation for usage examples.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

mod parse;

use parse::ProfileArgs;

/// Time every call of the annotated function as a scope.
///
/// The first argument is the profiler to record into. The label defaults to
/// the function's `module::function` path and can be overridden with `name`.
///
/// # Syntax
///
/// ```ignore
/// #[profile(PROFILER)]
/// fn parse(input: &str) -> Ast { /* ... */ }
///
/// #[profile(PROFILER, name = "sum pairs")]
/// fn sum(pairs: &[Pair]) -> f64 { /* ... */ }
/// ```
///
/// The scope closes on every exit path, including `return`, `?` and panics.
/// `async fn` and `const fn` are rejected: neither runs its body as one
/// contiguous interval on a single thread.
#[proc_macro_attribute]
pub fn profile(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as ProfileArgs);
    let item = parse_macro_input!(item as ItemFn);
    expand_profile(args, item)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_profile(args: ProfileArgs, item: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    if let Some(asyncness) = &item.sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "#[profile] cannot be applied to async functions",
        ));
    }
    if let Some(constness) = &item.sig.constness {
        return Err(syn::Error::new_spanned(
            constness,
            "#[profile] cannot be applied to const functions",
        ));
    }

    let ProfileArgs { profiler, name } = args;
    let label = match name {
        Some(label) => quote!(#label),
        None => quote!(::cycleprof::function_name!()),
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = item;

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            let __cycleprof_guard = (#profiler).scope(#label);
            #block
        }
    })
}
