//! Wall-clock guards for tests. The guarded body runs on its own thread and
//! the test fails if it hasn't finished when the deadline passes, even when
//! the body is stuck in blocking code that an async timeout can't interrupt.
//!
//! `BEACH_TEST_TIMEOUT_SCALE` multiplies every deadline (slow CI hosts).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Ident, ItemFn, LitInt, Token, parse_macro_input};

const DEFAULT_SECS: u64 = 60;

struct GuardArgs {
    secs: u64,
    multi_thread: bool,
}

impl Parse for GuardArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = GuardArgs {
            secs: DEFAULT_SECS,
            multi_thread: false,
        };
        if input.peek(LitInt) {
            let lit: LitInt = input.parse()?;
            args.secs = lit.base10_parse()?;
            if args.secs == 0 {
                return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
            }
            if input.is_empty() {
                return Ok(args);
            }
            input.parse::<Token![,]>()?;
        }
        while !input.is_empty() {
            let flag: Ident = input.parse()?;
            match flag.to_string().as_str() {
                "multi_thread" => args.multi_thread = true,
                _ => return Err(syn::Error::new_spanned(flag, "unknown option, expected `multi_thread`")),
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        Ok(args)
    }
}

#[derive(Clone, Copy)]
enum Flavor {
    Async,
    Sync,
}

/// `#[tokio_timeout_test]`, `#[tokio_timeout_test(10)]` or
/// `#[tokio_timeout_test(10, multi_thread)]` on an `async fn`.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as GuardArgs);
    let item = parse_macro_input!(item as ItemFn);
    expand(args, item, Flavor::Async)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// `#[timeout(5)]` on a plain synchronous test.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as GuardArgs);
    let item = parse_macro_input!(item as ItemFn);
    expand(args, item, Flavor::Sync)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(args: GuardArgs, item: ItemFn, flavor: Flavor) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = item;

    match flavor {
        Flavor::Async if sig.asyncness.is_none() => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "tokio_timeout_test can only be applied to async functions",
            ));
        }
        Flavor::Sync if sig.asyncness.is_some() => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "timeout expects a synchronous test function; use tokio_timeout_test",
            ));
        }
        Flavor::Sync if args.multi_thread => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "multi_thread only applies to tokio_timeout_test",
            ));
        }
        _ => {}
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs.into_iter().filter(|attr| !is_test_marker(attr)).collect();

    let secs = args.secs;
    let guarded = match flavor {
        Flavor::Sync => quote! { #block },
        Flavor::Async => {
            let builder = if args.multi_thread {
                quote! { tokio::runtime::Builder::new_multi_thread().worker_threads(2) }
            } else {
                quote! { tokio::runtime::Builder::new_current_thread() }
            };
            quote! {
                {
                    let runtime = #builder
                        .enable_all()
                        .build()
                        .expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(deadline, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }
            }
        }
    };

    Ok(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let scale: u32 = std::env::var("BEACH_TEST_TIMEOUT_SCALE")
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .filter(|scale| *scale > 0)
                .unwrap_or(1);
            let deadline = std::time::Duration::from_secs(#secs) * scale;
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #guarded));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {:?}", deadline)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

/// Drops `#[test]` and `#[tokio::test]` so the guard's own `#[test]` is the
/// only one.
fn is_test_marker(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
