//! Derive macros for `anadama`.
//!
//! This crate exists so that callable task actions can be written as plain
//! structs instead of trait objects assembled by hand. `#[derive(Action)]`
//! forwards `anadama::task::Action::run` to an inherent `execute` method,
//! which keeps the struct's execution logic next to its fields instead of
//! behind a manual `impl Action for ...` block.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Derives `anadama::task::Action` for a struct that defines an inherent
/// `execute(&self, input: anadama::task::Input, env: std::sync::Arc<anadama::utils::EnvVar>) -> anadama::task::Output`
/// method.
///
/// ```ignore
/// #[derive(Action)]
/// struct Touch(String);
///
/// impl Touch {
///     fn execute(&self, _input: Input, _env: Arc<EnvVar>) -> Output {
///         std::fs::File::create(&self.0).unwrap();
///         Output::empty()
///     }
/// }
/// ```
#[proc_macro_derive(Action)]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::anadama::task::Action for #name #ty_generics #where_clause {
            fn run(
                &self,
                input: ::anadama::task::Input,
                env: ::std::sync::Arc<::anadama::utils::EnvVar>,
            ) -> ::anadama::task::Output {
                self.execute(input, env)
            }
        }
    };

    expanded.into()
}
