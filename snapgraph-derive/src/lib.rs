//! Derive macro for snapgraph.
//!
//! `#[derive(SnapObject)]` turns a struct with named fields into a
//! serializable graph object: it generates the `Pack` impl (wire codec and
//! transitive registration) and the `Snap` impl (stamped field list,
//! ordered field writer, by-name field reader, lifecycle hooks).
//!
//! Fields are stamped and written in alphabetical order regardless of
//! declaration order, so reordering declarations never changes the wire
//! format.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, parse_quote, Data, DeriveInput, Error, Fields, Ident, LitStr,
};

/// Derives `snapgraph::Snap` and `snapgraph::Pack` for a struct.
///
/// # Attributes
///
/// Struct level, all optional:
///
/// ```ignore
/// #[snap(pre_serialize = "method")]        // fn(&mut self), before fields are written
/// #[snap(post_serialize = "method")]       // fn(&self), after the entry is written
/// #[snap(post_deserialize = "method")]     // fn(&mut self), after population
/// #[snap(late_post_deserialize = "method")] // fn(&mut self), at end of record
/// #[snap(raw_write = "method", raw_read = "method")] // opaque raw block
/// ```
///
/// Field level:
///
/// ```ignore
/// #[snap(skip)] // not stamped, not written; keeps its default on read
/// ```
#[proc_macro_derive(SnapObject, attributes(snap))]
pub fn derive_snap_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct StructAttrs {
    pre_serialize: Option<Ident>,
    post_serialize: Option<Ident>,
    post_deserialize: Option<Ident>,
    late_post_deserialize: Option<Ident>,
    raw_write: Option<Ident>,
    raw_read: Option<Ident>,
}

fn parse_struct_attrs(input: &DeriveInput) -> syn::Result<StructAttrs> {
    let mut attrs = StructAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("snap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let target = if meta.path.is_ident("pre_serialize") {
                &mut attrs.pre_serialize
            } else if meta.path.is_ident("post_serialize") {
                &mut attrs.post_serialize
            } else if meta.path.is_ident("post_deserialize") {
                &mut attrs.post_deserialize
            } else if meta.path.is_ident("late_post_deserialize") {
                &mut attrs.late_post_deserialize
            } else if meta.path.is_ident("raw_write") {
                &mut attrs.raw_write
            } else if meta.path.is_ident("raw_read") {
                &mut attrs.raw_read
            } else {
                return Err(meta.error("unknown snap attribute"));
            };
            let lit: LitStr = meta.value()?.parse()?;
            *target = Some(lit.parse()?);
            Ok(())
        })?;
    }
    if attrs.post_deserialize.is_some() && attrs.late_post_deserialize.is_some() {
        return Err(Error::new_spanned(
            input,
            "`post_deserialize` and `late_post_deserialize` are mutually exclusive",
        ));
    }
    if attrs.raw_write.is_some() != attrs.raw_read.is_some() {
        return Err(Error::new_spanned(
            input,
            "`raw_write` and `raw_read` must be specified together",
        ));
    }
    Ok(attrs)
}

fn field_is_skipped(field: &syn::Field) -> syn::Result<bool> {
    let mut skipped = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("snap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skipped = true;
                Ok(())
            } else {
                Err(meta.error("unknown snap attribute on field"))
            }
        })?;
    }
    Ok(skipped)
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(Error::new_spanned(
                    &input,
                    "SnapObject requires named fields",
                ))
            }
        },
        _ => {
            return Err(Error::new_spanned(
                &input,
                "SnapObject can only be derived for structs",
            ))
        }
    };

    let attrs = parse_struct_attrs(&input)?;
    let name = &input.ident;
    let name_str = name.to_string();

    // Serializable fields, alphabetical. Declaration order never touches
    // the wire format.
    let mut serialized: Vec<(&Ident, String, &syn::Type)> = Vec::new();
    for field in &fields {
        if field_is_skipped(field)? {
            continue;
        }
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| Error::new_spanned(field, "unnamed field"))?;
        serialized.push((ident, ident.to_string(), &field.ty));
    }
    serialized.sort_by(|a, b| a.1.cmp(&b.1));

    let field_idents: Vec<_> = serialized.iter().map(|(i, _, _)| *i).collect();
    let field_names: Vec<_> = serialized.iter().map(|(_, n, _)| n.clone()).collect();
    let field_types: Vec<_> = serialized.iter().map(|(_, _, t)| *t).collect();

    let mut generics = input.generics.clone();
    for param in generics.type_params_mut() {
        param.bounds.push(parse_quote!(snapgraph::Pack));
        param.bounds.push(parse_quote!(::std::default::Default));
        param.bounds.push(parse_quote!('static));
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let generic_keys: Vec<TokenStream2> = input
        .generics
        .type_params()
        .map(|p| {
            let ident = &p.ident;
            quote! { <#ident as snapgraph::Pack>::type_key() }
        })
        .collect();

    let has_raw = attrs.raw_write.is_some();
    let late_hook = attrs.late_post_deserialize.is_some();

    let pre_hook = attrs.pre_serialize.as_ref().map(|m| {
        quote! {
            fn pre_serialize(&mut self) {
                self.#m();
            }
        }
    });
    let post_write_hook = attrs.post_serialize.as_ref().map(|m| {
        quote! {
            fn post_serialize(&self) {
                self.#m();
            }
        }
    });
    let post_read_hook = attrs
        .post_deserialize
        .as_ref()
        .or(attrs.late_post_deserialize.as_ref())
        .map(|m| {
            quote! {
                fn post_deserialize(&mut self) {
                    self.#m();
                }
            }
        });
    let raw_write_fn = attrs.raw_write.as_ref().map(|m| {
        quote! {
            fn write_raw(&self, wire: &mut dyn snapgraph::WireWrite) -> snapgraph::Result<()> {
                self.#m(wire)
            }
        }
    });
    let raw_read_fn = attrs.raw_read.as_ref().map(|m| {
        quote! {
            fn read_raw(&mut self, wire: &mut dyn snapgraph::WireRead) -> snapgraph::Result<()> {
                self.#m(wire)
            }
        }
    });

    Ok(quote! {
        impl #impl_generics snapgraph::Pack for #name #ty_generics #where_clause {
            fn type_key() -> snapgraph::TypeKey {
                snapgraph::TypeKey::Named(
                    ::std::string::String::from(#name_str),
                    ::std::vec![#(#generic_keys),*],
                )
            }

            fn write_into(
                &self,
                cx: &mut snapgraph::WriteCx<'_>,
            ) -> snapgraph::Result<()> {
                snapgraph::rt::write_inline(self, cx)
            }

            fn read_from(cx: &mut snapgraph::ReadCx<'_>) -> snapgraph::Result<Self> {
                snapgraph::rt::read_inline(cx)
            }

            fn register_with(
                registry: &snapgraph::TypeRegistry,
            ) -> snapgraph::Result<()> {
                if registry.add_object_entry::<Self>()? {
                    #(<#field_types as snapgraph::Pack>::register_with(registry)?;)*
                }
                ::std::result::Result::Ok(())
            }

            fn register_heap(
                registry: &snapgraph::TypeRegistry,
            ) -> snapgraph::Result<()> {
                <Self as snapgraph::Pack>::register_with(registry)
            }
        }

        impl #impl_generics snapgraph::Snap for #name #ty_generics #where_clause {
            const HAS_RAW: bool = #has_raw;
            const LATE_HOOK: bool = #late_hook;

            fn fields() -> ::std::vec::Vec<snapgraph::FieldDescriptor> {
                ::std::vec![
                    #(snapgraph::FieldDescriptor::new(
                        #field_names,
                        <#field_types as snapgraph::Pack>::type_key(),
                    )),*
                ]
            }

            fn write_fields(
                &self,
                cx: &mut snapgraph::WriteCx<'_>,
            ) -> snapgraph::Result<()> {
                #(snapgraph::Pack::write_into(&self.#field_idents, cx)?;)*
                ::std::result::Result::Ok(())
            }

            fn read_field(
                &mut self,
                name: &str,
                cx: &mut snapgraph::ReadCx<'_>,
            ) -> snapgraph::Result<()> {
                match name {
                    #(#field_names => {
                        self.#field_idents =
                            <#field_types as snapgraph::Pack>::read_from(cx)?;
                    })*
                    other => {
                        return ::std::result::Result::Err(
                            snapgraph::SnapError::Internal(::std::format!(
                                "type `{}` has no field `{other}`", #name_str
                            )),
                        )
                    }
                }
                ::std::result::Result::Ok(())
            }

            #pre_hook
            #post_write_hook
            #post_read_hook
            #raw_write_fn
            #raw_read_fn
        }
    })
}
