//! Parsing logic for `#[profile(...)]` attribute arguments.

use syn::parse::{Parse, ParseStream};
use syn::{Expr, Ident, LitStr, Result, Token};

/// Parsed arguments of `#[profile(PROFILER, name = "label")]`.
pub struct ProfileArgs {
    /// Required: expression evaluating to a `Profiler` (or a reference/deref to one)
    pub profiler: Expr,
    /// Optional: explicit scope label
    pub name: Option<LitStr>,
}

impl Parse for ProfileArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        if input.is_empty() {
            return Err(input.error(
                "missing profiler: expected `#[profile(PROFILER)]` or `#[profile(PROFILER, name = \"label\")]`",
            ));
        }

        let profiler: Expr = input.parse()?;
        let mut name = None;

        while !input.is_empty() {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }

            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match key.to_string().as_str() {
                "name" => {
                    if name.is_some() {
                        return Err(syn::Error::new(key.span(), "duplicate field `name`"));
                    }
                    let label: LitStr = input.parse()?;
                    if label.value().is_empty() {
                        return Err(syn::Error::new(label.span(), "scope label must not be empty"));
                    }
                    name = Some(label);
                }
                other => {
                    return Err(syn::Error::new(
                        key.span(),
                        format!("unknown field `{}`, expected `name`", other),
                    ));
                }
            }
        }

        Ok(Self { profiler, name })
    }
}
