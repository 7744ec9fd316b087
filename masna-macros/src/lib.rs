//! Procedural macros for Masna.
//!
//! `#[derive(Component)]` turns `#[masna(...)]` field attributes into a
//! `Component::describe` implementation:
//!
//! ```rust,ignore
//! #[derive(Default, Component)]
//! #[masna(methods(init))]
//! struct Service {
//!     #[masna(wire = "auto")]
//!     repo: Option<Arc<Repo>>,
//!     #[masna(value = "${settings.port}", expose)]
//!     port: u16,
//!     #[masna(new = "name:primary, 5")]
//!     pool: Option<Arc<dyn Pool>>,
//!     #[masna(embed)]
//!     base: Base,
//! }
//! ```

use darling::util::{Override, PathList};
use darling::{FromDeriveInput, FromField, ast};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Ident, Path, parse_macro_input};

#[derive(FromDeriveInput)]
#[darling(attributes(masna), supports(struct_named, struct_unit))]
struct ComponentInput {
    ident: Ident,
    generics: syn::Generics,
    data: ast::Data<(), ComponentField>,
    /// Methods that may serve as init methods.
    #[darling(default)]
    methods: PathList,
    /// Path to the masna crate, for crates that rename it.
    #[darling(default, rename = "crate")]
    krate: Option<Path>,
}

#[derive(FromField)]
#[darling(attributes(masna))]
struct ComponentField {
    ident: Option<Ident>,
    wire: Option<String>,
    value: Option<String>,
    new: Option<Override<String>>,
    setter: Option<Path>,
    #[darling(default)]
    embed: bool,
    #[darling(default)]
    expose: bool,
}

impl ComponentField {
    fn has_tags(&self) -> bool {
        self.wire.is_some() || self.value.is_some() || self.new.is_some()
    }
}

#[proc_macro_derive(Component, attributes(masna))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match ComponentInput::from_derive_input(&input).and_then(expand) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.write_errors().into(),
    }
}

fn expand(input: ComponentInput) -> darling::Result<TokenStream2> {
    let krate = input
        .krate
        .clone()
        .unwrap_or_else(|| syn::parse_quote!(::masna));
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let Some(fields) = input.data.as_ref().take_struct() else {
        return Err(darling::Error::unsupported_shape("enum"));
    };

    let mut errors = darling::Error::accumulator();
    let mut declarations = Vec::new();
    let mut exposed = Vec::new();
    let mut embedded = Vec::new();

    for field in fields.fields {
        let Some(name) = &field.ident else { continue };
        let label = name.to_string();

        if field.embed {
            if field.has_tags() || field.setter.is_some() {
                errors.push(
                    darling::Error::custom("`embed` cannot be combined with tags or a setter")
                        .with_span(name),
                );
                continue;
            }
            declarations.push(quote! {
                descriptor.embed(#label, |this| &mut this.#name);
            });
            embedded.push((label.clone(), name.clone()));
        } else if field.has_tags() {
            let mut chain = Vec::new();
            if let Some(wire) = &field.wire {
                chain.push(quote! { .wire(#wire) });
            }
            if let Some(value) = &field.value {
                chain.push(quote! { .value(#value) });
            }
            match &field.new {
                Some(Override::Explicit(params)) => chain.push(quote! { .new_params(#params) }),
                Some(Override::Inherit) => chain.push(quote! { .new_params("") }),
                None => {}
            }
            if let Some(setter) = &field.setter {
                let setter = qualify(setter);
                chain.push(quote! { .setter(#setter) });
            }
            declarations.push(quote! {
                descriptor.field(#label, |this| &mut this.#name) #(#chain)*;
            });
        } else if field.setter.is_some() {
            errors.push(darling::Error::custom("`setter` needs a tag on the same field").with_span(name));
        }

        if field.expose {
            exposed.push((label, name.clone()));
        }
    }

    for method in input.methods.iter() {
        let Some(last) = method.segments.last() else { continue };
        let label = last.ident.to_string();
        let method = qualify(method);
        declarations.push(quote! {
            descriptor.method(#label, #method);
        });
    }

    errors.finish()?;

    let property = if exposed.is_empty() && embedded.is_empty() {
        TokenStream2::new()
    } else {
        let exposed_arms = exposed.iter().map(|(label, name)| {
            quote! {
                #label => return ::core::option::Option::Some(
                    #krate::ToExprValue::to_expr_value(&self.#name)
                ),
            }
        });
        let prefixed = embedded.iter().map(|(label, name)| {
            let prefix = format!("{label}.");
            quote! {
                if let ::core::option::Option::Some(rest) = path.strip_prefix(#prefix) {
                    return #krate::Component::property(&self.#name, rest);
                }
            }
        });
        let promoted = embedded.iter().map(|(_, name)| {
            quote! {
                if let found @ ::core::option::Option::Some(_) =
                    #krate::Component::property(&self.#name, path)
                {
                    return found;
                }
            }
        });

        quote! {
            fn property(&self, path: &str) -> ::core::option::Option<#krate::ExprValue> {
                match path {
                    #(#exposed_arms)*
                    _ => {}
                }
                #(#prefixed)*
                #(#promoted)*
                ::core::option::Option::None
            }
        }
    };

    Ok(quote! {
        impl #impl_generics #krate::Component for #ident #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn describe(descriptor: &mut #krate::Descriptor<Self>) {
                #(#declarations)*
            }

            #property
        }
    })
}

/// A bare method name refers to a method of the deriving type.
fn qualify(path: &Path) -> TokenStream2 {
    if path.leading_colon.is_none() && path.segments.len() == 1 {
        quote! { Self::#path }
    } else {
        quote! { #path }
    }
}
