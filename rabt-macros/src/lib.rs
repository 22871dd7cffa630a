//! Procedural macros for Rabt.
//!
//! Use them through the `rabt` crate, which re-exports them.

use darling::util::{Flag, Override};
use darling::{FromDeriveInput, FromField, ast};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{DeriveInput, GenericArgument, PathArguments, Type, parse_macro_input};

/// Derives `Injectable` for a struct with named fields or a unit struct.
///
/// Every field becomes a constructor parameter, in declaration order,
/// unless it is marked `skip` (filled with `Default::default()`) or
/// `member` (an `Option<T>` field set after construction).
///
/// ```rust,ignore
/// #[derive(Injectable)]
/// #[injectable(provides = "dyn Notifier", disposable)]
/// struct EmailNotifier {
///     transport: Arc<dyn Transport>,
///     #[inject(name = "audit")]
///     log: Arc<dyn Log>,
///     #[inject(key = "Region::Eu")]
///     relay: Arc<dyn Relay>,
///     #[inject(default = "Arc::new(Retries(3))")]
///     retries: Arc<Retries>,
///     #[inject(member, required)]
///     metrics: Option<Arc<Metrics>>,
///     #[inject(skip)]
///     sent: AtomicU64,
/// }
/// ```
///
/// Struct options (`#[injectable(..)]`):
/// - `provides = "dyn Trait"`: also implement `Implements<dyn Trait>`, repeatable
/// - `disposable`: instances are disposed through the type's `Dispose` impl
/// - `crate = "path"`: path to the `rabt` crate, `::rabt` by default
///
/// Field options (`#[inject(..)]`):
/// - `name = ".."` / `key = "expr"`: resolve a named or keyed binding
/// - `default` / `default = "expr"`: value used when resolution fails
/// - `skip`: not injected
/// - `member`, `required`: inject after construction
#[proc_macro_derive(Injectable, attributes(injectable, inject))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    InjectableInput::from_derive_input(&input)
        .and_then(|parsed| expand(&parsed))
        .unwrap_or_else(|error| error.write_errors())
        .into()
}

#[derive(FromDeriveInput)]
#[darling(attributes(injectable), supports(struct_named, struct_unit))]
struct InjectableInput {
    ident: syn::Ident,
    generics: syn::Generics,
    data: ast::Data<(), InjectField>,
    #[darling(multiple)]
    provides: Vec<Type>,
    disposable: Flag,
    #[darling(rename = "crate")]
    krate: Option<syn::Path>,
}

#[derive(FromField)]
#[darling(attributes(inject))]
struct InjectField {
    ident: Option<syn::Ident>,
    ty: Type,
    name: Option<String>,
    key: Option<syn::Expr>,
    default: Option<Override<syn::Expr>>,
    skip: Flag,
    member: Flag,
    required: Flag,
}

enum FieldRole<'a> {
    Parameter,
    Skipped,
    Member { inner: &'a Type },
}

impl InjectField {
    fn role(&self) -> darling::Result<FieldRole<'_>> {
        if self.skip.is_present() {
            if self.member.is_present() || self.required.is_present() {
                return Err(darling::Error::custom("`skip` cannot be combined with `member` or `required`")
                    .with_span(&self.ty));
            }
            return Ok(FieldRole::Skipped);
        }

        if self.member.is_present() {
            if self.default.is_some() {
                return Err(darling::Error::custom("members cannot have a `default`; leave them unset instead")
                    .with_span(&self.ty));
            }
            let inner = option_inner(&self.ty).ok_or_else(|| {
                darling::Error::custom("`member` fields must have type `Option<T>`").with_span(&self.ty)
            })?;
            return Ok(FieldRole::Member { inner });
        }

        if self.required.is_present() {
            return Err(darling::Error::custom("`required` only applies to `member` fields")
                .with_span(&self.ty));
        }
        if self.name.is_some() && self.key.is_some() {
            return Err(darling::Error::custom("use either `name` or `key`, not both").with_span(&self.ty));
        }
        Ok(FieldRole::Parameter)
    }

    fn selector(&self) -> TokenStream2 {
        match (&self.name, &self.key) {
            (Some(name), _) => quote! { .named(#name) },
            (None, Some(key)) => quote! { .keyed(#key) },
            (None, None) => TokenStream2::new(),
        }
    }
}

/// `T` for a field declared as `Option<T>`.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };
    match arguments.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn expand(input: &InjectableInput) -> darling::Result<TokenStream2> {
    let krate = input
        .krate
        .clone()
        .unwrap_or_else(|| syn::parse_quote!(::rabt));
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = input
        .data
        .as_ref()
        .take_struct()
        .ok_or_else(|| darling::Error::unsupported_shape("enum"))?
        .fields;

    let mut errors = darling::Error::accumulator();
    let mut takes = Vec::new();
    let mut inits = Vec::new();
    let mut parameters = Vec::new();
    let mut members = Vec::new();

    for field in fields {
        let Some(role) = errors.handle(field.role()) else {
            continue;
        };
        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let ty = &field.ty;
        let label = field_ident.to_string();

        match role {
            FieldRole::Skipped => {
                inits.push(quote! { #field_ident: ::core::default::Default::default() });
            }
            FieldRole::Member { inner } => {
                let selector = field.selector();
                let required = field.required.is_present().then(|| quote! { .required() });
                inits.push(quote! { #field_ident: ::core::option::Option::None });
                members.push(quote! {
                    .member(
                        #krate::descriptor::Member::new::<#inner, _>(#label, |target: &mut Self, value| {
                            target.#field_ident = ::core::option::Option::Some(value);
                        })
                        #selector
                        #required
                    )
                });
            }
            FieldRole::Parameter => {
                let local = format_ident!("__{}", field_ident);
                let selector = field.selector();
                let default = match &field.default {
                    None => TokenStream2::new(),
                    Some(Override::Inherit) => quote! {
                        .with_default(|| -> #ty { ::core::default::Default::default() })
                    },
                    Some(Override::Explicit(expr)) => quote! {
                        .with_default(|| -> #ty { #expr })
                    },
                };

                takes.push(quote! { let #local = __args.take::<#ty>()?; });
                inits.push(quote! { #field_ident: #local });
                parameters.push(quote! {
                    .with(
                        #krate::descriptor::Parameter::new::<#ty>(#label)
                        #selector
                        #default
                    )
                });
            }
        }
    }

    errors.finish()?;

    let disposable = input.disposable.is_present().then(|| quote! { .disposable() });
    let provides = input.provides.iter().map(|service| {
        quote! {
            impl #impl_generics #krate::descriptor::Implements<#service> for #ident #ty_generics #where_clause {
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<#service> {
                    self
                }
            }
        }
    });

    Ok(quote! {
        impl #impl_generics #krate::descriptor::Injectable for #ident #ty_generics #where_clause {
            fn descriptor() -> #krate::descriptor::Descriptor<Self> {
                #krate::descriptor::Descriptor::new()
                    .constructor(
                        #krate::descriptor::Constructor::new(|__args: &mut #krate::descriptor::Arguments| {
                            #(#takes)*
                            ::core::result::Result::Ok(Self { #(#inits),* })
                        })
                        #(#parameters)*
                    )
                    #(#members)*
                    #disposable
            }
        }

        #(#provides)*
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> darling::Result<InjectableInput> {
        let input: DeriveInput = syn::parse_str(source).expect("valid struct");
        InjectableInput::from_derive_input(&input)
    }

    #[test]
    fn option_inner_type() {
        let ty: Type = syn::parse_quote!(Option<Arc<dyn Metrics>>);
        let inner = option_inner(&ty).unwrap();
        assert_eq!(quote!(#inner).to_string(), quote!(Arc<dyn Metrics>).to_string());

        let ty: Type = syn::parse_quote!(Arc<dyn Metrics>);
        assert!(option_inner(&ty).is_none());
    }

    #[test]
    fn struct_options_are_parsed() {
        let parsed = parse(
            r#"
            #[injectable(provides = "dyn Notifier", provides = "dyn Sink", disposable, crate = "crate")]
            struct Email { transport: Arc<dyn Transport> }
            "#,
        )
        .unwrap();

        assert_eq!(parsed.provides.len(), 2);
        assert!(parsed.disposable.is_present());
        assert!(parsed.krate.is_some());
    }

    #[test]
    fn expansion_mentions_every_parameter() {
        let parsed = parse(
            r#"
            struct Email {
                transport: Arc<dyn Transport>,
                #[inject(name = "audit")]
                log: Arc<dyn Log>,
                #[inject(skip)]
                sent: u64,
            }
            "#,
        )
        .unwrap();

        let expanded = expand(&parsed).unwrap().to_string();
        assert!(expanded.contains("\"transport\""));
        assert!(expanded.contains("named"));
        assert!(!expanded.contains("\"sent\""));
    }

    #[test]
    fn member_must_be_option() {
        let parsed = parse(
            r#"
            struct Email {
                #[inject(member)]
                metrics: Arc<Metrics>,
            }
            "#,
        )
        .unwrap();

        assert!(expand(&parsed).is_err());
    }

    #[test]
    fn tuple_structs_are_rejected() {
        assert!(parse("struct Email(Arc<dyn Transport>);").is_err());
    }
}
