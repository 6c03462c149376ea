use proc_macro::TokenStream;

mod progress;

/// Attaches an indicatif progress message to an instrumented function span.
///
/// Supported arguments:
/// - `message = <expr>`: shown while the span is active.
/// - `finished = <expr>`: shown when the span closes.
/// - `failed = <expr>` (optional, async functions returning `Result` only): replaces the
///   finish message when the function returns `Err`.
#[proc_macro_attribute]
pub fn progress(attr: TokenStream, item: TokenStream) -> TokenStream {
    progress::expand(attr, item)
}
