#![recursion_limit = "256"]

type TokenStream1 = proc_macro::TokenStream;
type TokenStream2 = proc_macro2::TokenStream;

use quote::quote;
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Error, Fields, LitStr, Path};

/// Derives `collectives::datatype::Equivalence` for a struct whose fields all consist of the same
/// elementary type, e.g. `struct Particle { position: [f64; 3], mass: f64 }`.
///
/// The struct is treated as a run of `COUNT` elements, the sum of the fields' counts. The
/// generated code fails to compile if the fields consist of different element types or if the
/// struct contains padding.
///
/// Use `#[collectives(crate = "::path::to::collectives")]` if the crate is renamed.
#[proc_macro_derive(Equivalence, attributes(collectives))]
pub fn create_equivalence(input: TokenStream1) -> TokenStream1 {
    let ast = syn::parse_macro_input!(input as DeriveInput);
    let result = match ast.data {
        Data::Enum(_) => Err(Error::new(
            ast.ident.span(),
            "#[derive(Equivalence)] is not compatible with enums",
        )),
        Data::Union(_) => Err(Error::new(
            ast.ident.span(),
            "#[derive(Equivalence)] is not compatible with unions",
        )),
        Data::Struct(ref s) => equivalence_for_struct(&ast, &s.fields),
    };
    result.unwrap_or_else(Error::into_compile_error).into()
}

fn crate_path(ast: &DeriveInput) -> syn::Result<Path> {
    let mut path: Path = syn::parse_quote!(::collectives);
    for attr in ast.attrs.iter().filter(|attr| attr.path().is_ident("collectives")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                let lit: LitStr = meta.value()?.parse()?;
                path = lit.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported collectives attribute"))
            }
        })?;
    }
    Ok(path)
}

fn equivalence_for_struct(ast: &DeriveInput, fields: &Fields) -> syn::Result<TokenStream2> {
    let ident = &ast.ident;
    let krate = crate_path(ast)?;

    if !ast.generics.params.is_empty() {
        return Err(Error::new(
            ast.generics.span(),
            "#[derive(Equivalence)] does not support generic structs",
        ));
    }

    let types: Vec<_> = fields.iter().map(|field| &field.ty).collect();
    let first = types.first().ok_or_else(|| {
        Error::new(ident.span(), "#[derive(Equivalence)] needs at least one field")
    })?;

    let datatype_of = |ty: &syn::Type| {
        quote! {
            <<#ty as #krate::datatype::Equivalence>::Element
                as #krate::datatype::Elementary>::DATATYPE as u8
        }
    };
    let first_datatype = datatype_of(*first);
    let same_element = types.iter().map(|ty| {
        let datatype = datatype_of(*ty);
        quote! {
            assert!(
                #datatype == #first_datatype,
                "all fields of an Equivalence struct must consist of the same element type"
            );
        }
    });

    Ok(quote! {
        unsafe impl #krate::datatype::Equivalence for #ident {
            type Element = <#first as #krate::datatype::Equivalence>::Element;
            const COUNT: usize = 0 #(+ <#types as #krate::datatype::Equivalence>::COUNT)*;
        }

        const _: () = {
            #(#same_element)*
            assert!(
                ::std::mem::size_of::<#ident>()
                    == <#ident as #krate::datatype::Equivalence>::COUNT
                        * ::std::mem::size_of::<
                            <#ident as #krate::datatype::Equivalence>::Element,
                        >(),
                "an Equivalence struct must not contain padding"
            );
        };
    })
}
