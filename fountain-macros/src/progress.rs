use proc_macro::TokenStream;
use proc_macro2::TokenTree;
use quote::quote;
use syn::{ItemFn, ReturnType};

struct ProgressAttrs {
    message: syn::Expr,
    finished: syn::Expr,
    failed: Option<syn::Expr>,
}

impl syn::parse::Parse for ProgressAttrs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut message = None;
        let mut finished = None;
        let mut failed = None;

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            input.parse::<syn::Token![=]>()?;

            if ident == "message" {
                message = Some(input.parse::<syn::Expr>()?);
            } else if ident == "finished" {
                finished = Some(input.parse::<syn::Expr>()?);
            } else if ident == "failed" {
                failed = Some(input.parse::<syn::Expr>()?);
            } else {
                return Err(syn::Error::new(
                    ident.span(),
                    format!("unknown argument `{ident}`"),
                ));
            }

            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }

        let message = message.ok_or_else(|| input.error("missing `message` argument"))?;
        let finished = finished.ok_or_else(|| input.error("missing `finished` argument"))?;

        Ok(ProgressAttrs {
            message,
            finished,
            failed,
        })
    }
}

pub fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let progress_attrs = match syn::parse::<ProgressAttrs>(attr) {
        Ok(attrs) => attrs,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(err) => return err.to_compile_error().into(),
    };

    let message = &progress_attrs.message;
    let finished = &progress_attrs.finished;

    if !inject_progress_into_instrument(&mut func) {
        func.attrs
            .push(syn::parse_quote!(#[tracing::instrument(fields(progress = true))]));
    }

    let original_stmts = std::mem::take(&mut func.block.stmts);
    let prelude = quote!({
        use tracing_indicatif::span_ext::IndicatifSpanExt as _;
        let __progress_span = tracing::Span::current();
        __progress_span.pb_set_message(#message);
        __progress_span.pb_set_finish_message(&#finished);
    });

    let Some(failed) = progress_attrs.failed.as_ref() else {
        func.block = syn::parse_quote!({
            #prelude
            #(#original_stmts)*
        });
        return quote!(#func).into();
    };

    if func.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &func.sig.fn_token,
            "`failed` is only supported on async functions",
        )
        .to_compile_error()
        .into();
    }
    let ReturnType::Type(_, return_type) = &func.sig.output else {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "`failed` requires a function returning `Result`",
        )
        .to_compile_error()
        .into();
    };
    let return_type = return_type.clone();

    func.block = syn::parse_quote!({
        #prelude
        let __progress_result: #return_type = async move { #(#original_stmts)* }.await;
        if __progress_result.is_err() {
            use tracing_indicatif::span_ext::IndicatifSpanExt as _;
            tracing::Span::current().pb_set_finish_message(&#failed);
        }
        __progress_result
    });

    quote!(#func).into()
}

/// Finds an `#[instrument]` attribute on the function and injects
/// `progress = true` into its `fields(...)` argument. Returns `true` if
/// an `#[instrument]` attribute was found and modified.
fn inject_progress_into_instrument(func: &mut ItemFn) -> bool {
    for attr in &mut func.attrs {
        if !attr.path().is_ident("instrument") {
            continue;
        }

        match &attr.meta {
            syn::Meta::List(meta_list) => {
                let modified = inject_progress_field(meta_list.tokens.clone());
                *attr = syn::parse_quote!(#[instrument(#modified)]);
            }
            syn::Meta::Path(_) => {
                *attr = syn::parse_quote!(#[instrument(fields(progress = true))]);
            }
            _ => continue,
        }

        return true;
    }

    false
}

/// Rewrites the `fields(...)` group of an `#[instrument(...)]` token stream so it
/// carries `progress = true`, appending the group when absent.
fn inject_progress_field(tokens: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    let trees: Vec<TokenTree> = tokens.into_iter().collect();
    let mut result = Vec::with_capacity(trees.len() + 2);
    let mut found_fields = false;
    let mut index = 0;

    while index < trees.len() {
        let Some(inner) = fields_group_at(&trees, index) else {
            result.push(trees[index].clone());
            index += 1;
            continue;
        };

        found_fields = true;
        let new_inner = if inner.is_empty() {
            quote!(progress = true)
        } else {
            quote!(#inner, progress = true)
        };
        result.push(trees[index].clone());
        result.push(TokenTree::Group(proc_macro2::Group::new(
            proc_macro2::Delimiter::Parenthesis,
            new_inner,
        )));
        index += 2;
    }

    let result_stream: proc_macro2::TokenStream = result.into_iter().collect();

    if found_fields {
        return result_stream;
    }
    if result_stream.is_empty() {
        return quote!(fields(progress = true));
    }
    quote!(#result_stream, fields(progress = true))
}

fn fields_group_at(trees: &[TokenTree], index: usize) -> Option<proc_macro2::TokenStream> {
    let TokenTree::Ident(ident) = &trees[index] else {
        return None;
    };
    if ident != "fields" {
        return None;
    }
    let Some(TokenTree::Group(group)) = trees.get(index + 1) else {
        return None;
    };
    (group.delimiter() == proc_macro2::Delimiter::Parenthesis).then(|| group.stream())
}
