//! Derive macros for the consensus wire codec.
//!
//! `#[derive(WireSer)]` and `#[derive(WireDeser)]` expand to field-by-field
//! implementations of the `WireSerialize` / `WireDeserialize` traits defined
//! in `umbra-chain`. Fields are encoded in declaration order, which is what
//! makes the derive usable for consensus-critical layouts. Only structs are
//! supported: every wire enum in the workspace carries a hand-written
//! tagged encoding instead.
extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;

fn struct_fields(ast: &syn::DeriveInput) -> &syn::Fields {
    match &ast.data {
        syn::Data::Struct(data) => &data.fields,
        _ => panic!("wire derives apply only to structs"),
    }
}

#[proc_macro_derive(WireSer)]
pub fn wire_serializable(input: TokenStream) -> TokenStream {
    let ast: syn::DeriveInput = syn::parse(input).expect("WireSer input parses");
    let name = &ast.ident;

    let writes = struct_fields(&ast).iter().enumerate().map(|(index, field)| {
        let accessor = match &field.ident {
            Some(ident) => quote! { self.#ident },
            None => {
                let index = syn::Index::from(index);
                quote! { self.#index }
            }
        };
        quote! { #accessor.wire_serialize(&mut target)?; }
    });

    TokenStream::from(quote! {
        impl WireSerialize for #name {
            fn wire_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
            where
                W: std::io::Write,
            {
                #(#writes)*
                Ok(())
            }
        }
    })
}

#[proc_macro_derive(WireDeser)]
pub fn wire_deserializable(input: TokenStream) -> TokenStream {
    let ast: syn::DeriveInput = syn::parse(input).expect("WireDeser input parses");
    let name = &ast.ident;
    let fields = struct_fields(&ast);

    let reads = fields.iter().map(|field| {
        let ty = &field.ty;
        match &field.ident {
            Some(ident) => quote! { #ident: <#ty as WireDeserialize>::wire_deserialize(&mut target)?, },
            None => quote! { <#ty as WireDeserialize>::wire_deserialize(&mut target)?, },
        }
    });
    let constructor = match fields {
        syn::Fields::Unnamed(_) => quote! { Ok(#name( #(#reads)* )) },
        _ => quote! { Ok(#name { #(#reads)* }) },
    };

    TokenStream::from(quote! {
        impl WireDeserialize for #name {
            fn wire_deserialize<R: std::io::Read>(
                mut target: R,
            ) -> Result<Self, SerializationError> {
                #constructor
            }
        }
    })
}
