use std::path::PathBuf;

use proc_macro::TokenStream;
use quote::{quote, ToTokens, TokenStreamExt};
use rtmigrator_core::script::find_sql_fragments;
use syn::{parse_macro_input, LitStr};

pub(crate) fn crate_root() -> PathBuf {
    let crate_root = std::env::var("CARGO_MANIFEST_DIR")
        .expect("CARGO_MANIFEST_DIR environment variable not present");
    PathBuf::from(crate_root)
}

struct MacroScriptFragment(PathBuf, String);

impl ToTokens for MacroScriptFragment {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let name = &self.1;
        let sql = self
            .0
            .to_str()
            .map(|path_str| quote! { include_str!(#path_str) })
            .unwrap_or_else(|| {
                let err = format!(
                    "script path cannot be represented as a string: {}",
                    self.0.display()
                );
                quote!(compile_error!(#err))
            });
        let ts = quote! {
            rtmigrator::__core::script::ScriptFragment {
                name: ::std::borrow::Cow::Borrowed(#name),
                sql: ::std::borrow::Cow::Borrowed(#sql),
            }
        };
        tokens.append_all(ts);
    }
}

/// Embeds every `*.sql` file below a directory (relative to the crate root,
/// `scripts` when omitted) as a `fragments()` function returning
/// `&'static [ScriptFragment]`.
#[proc_macro]
pub fn embed_scripts(input: TokenStream) -> TokenStream {
    let location = if input.is_empty() {
        crate_root().join("scripts")
    } else {
        let location: LitStr = parse_macro_input!(input);
        crate_root().join(location.value())
    };
    let files = match find_sql_fragments(&location) {
        Ok(files) => files,
        Err(e) => {
            let err = format!("error finding sql files in {}: {e}", location.display());
            return quote!(compile_error!(#err);).into();
        }
    };
    let fragments: Vec<proc_macro2::TokenStream> = files
        .into_iter()
        .map(|(path, name)| MacroScriptFragment(path, name).into_token_stream())
        .collect();

    quote! {
        pub const fn fragments() -> &'static [rtmigrator::__core::script::ScriptFragment] {
            const FRAGMENTS: &[rtmigrator::__core::script::ScriptFragment] = &[#(#fragments),*];
            FRAGMENTS
        }
    }
    .into()
}
