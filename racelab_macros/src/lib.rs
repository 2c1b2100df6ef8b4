//! Attribute macros that strip the derive boilerplate off racelab metrics and aggregates.
//!
//! Both macros expect `serde` to be a dependency of the calling crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, parse_macro_input};

extern crate proc_macro;

/// Derives everything a `Metric` needs and implements the marker trait.
///
/// The `Metric` trait must be in scope at the call site.
#[proc_macro_attribute]
pub fn metric(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let ident = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast

        impl #impl_generics Metric for #ident #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

/// Derives the bounds an `Aggregate` needs, including `Default` so `Aggregate::new`
/// can start from an empty value.
#[proc_macro_attribute]
pub fn aggregate(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone,
            std::default::Default
        )]
        #ast
    };

    TokenStream::from(expanded)
}
