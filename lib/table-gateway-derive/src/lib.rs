use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input};

const TIMESTAMP_COLUMNS: [&str; 6] = [
    "created_at",
    "created_date",
    "created_time",
    "updated_at",
    "updated_date",
    "updated_time",
];

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Convert CamelCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Parse a `key = "value"` string literal inside a nested meta.
fn parse_str_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    let lit: Lit = meta.value()?.parse()?;
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

/// Consume a nested meta item this macro does not care about.
fn skip_meta(meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        content.parse::<proc_macro2::TokenStream>()?;
    }
    Ok(())
}

#[derive(Default)]
struct TableAttrs {
    name: Option<String>,
    entity: Option<String>,
    primary_key: Option<String>,
    insert_serial: Option<bool>,
}

/// Parse #[table(name = "...", entity = "...", primary_key = "...", insert_serial = false)]
fn parse_table_attr(input: &DeriveInput) -> syn::Result<TableAttrs> {
    let mut attrs = TableAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("table") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                attrs.name = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("entity") {
                attrs.entity = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("primary_key") {
                attrs.primary_key = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("insert_serial") {
                let lit: syn::LitBool = meta.value()?.parse()?;
                attrs.insert_serial = Some(lit.value);
            } else {
                return Err(meta.error("unsupported table attribute"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

/// Whether the struct carries #[serde(rename_all = "camelCase")]
fn serde_camel_case(input: &DeriveInput) -> bool {
    let mut camel = false;
    for attr in &input.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                camel = parse_str_value(&meta)? == "camelCase";
                return Ok(());
            }
            skip_meta(&meta)
        });
    }
    camel
}

/// Field-level #[serde(rename = "...")]
fn serde_rename(field: &syn::Field) -> Option<String> {
    let mut rename = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") && meta.input.peek(syn::Token![=]) {
                rename = Some(parse_str_value(&meta)?);
                return Ok(());
            }
            skip_meta(&meta)
        });
    }
    rename
}

/// Check if a field has #[column(skip)]
fn has_column_skip(field: &syn::Field) -> bool {
    for attr in &field.attrs {
        if attr.path().is_ident("column") {
            let mut skip = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    return Ok(());
                }
                skip_meta(&meta)
            });
            if skip {
                return true;
            }
        }
    }
    false
}

/// Get custom column name from #[column(name = "...")] or None
fn get_column_name(field: &syn::Field) -> Option<String> {
    for attr in &field.attrs {
        if attr.path().is_ident("column") {
            let mut name = None;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    name = Some(parse_str_value(&meta)?);
                    return Ok(());
                }
                skip_meta(&meta)
            });
            if name.is_some() {
                return name;
            }
        }
    }
    None
}

/// Map Rust type to generic SQL type name
fn rust_type_to_sql_type(ty: &syn::Type) -> &'static str {
    let type_str = quote::quote!(#ty).to_string();
    // Remove spaces for easier matching
    let type_str = type_str.replace(' ', "");

    // Check for Option<T> - extract inner type
    let inner_type = type_str
        .strip_prefix("Option<")
        .or_else(|| type_str.strip_prefix("std::option::Option<"))
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(type_str.as_str());

    match inner_type {
        // Datetime types
        s if s.contains("GatewayDatetime") => "datetime",
        s if s.contains("DateTime") => "datetime",
        s if s.ends_with("NaiveDate") => "date",
        s if s.ends_with("NaiveTime") => "time",
        // Integer types
        "u64" | "i64" => "bigint",
        "u32" | "i32" | "u16" | "i16" | "u8" | "i8" | "usize" | "isize" => "integer",
        "f32" | "f64" => "float",
        // Boolean
        "bool" => "boolean",
        s if s.ends_with("json::Value") || s.starts_with("Vec<") || s.contains("Map<") => "json",
        // Default to text for String and everything else
        _ => "text",
    }
}

fn optional_column(present: &[String], column: &str) -> proc_macro2::TokenStream {
    if present.iter().any(|c| c == column) {
        quote! { Some(#column.to_string()) }
    } else {
        quote! { None }
    }
}

/// Derive macro for the `Table` trait.
///
/// ## Attributes
///
/// - `#[table(name = "...")]` - table name, defaults to the struct name in snake_case
/// - `#[table(primary_key = "...")]` - defaults to `{table}_id`
/// - `#[table(insert_serial = false)]` - insert the primary key as given
/// - `#[table(entity = "...")]` - registry identifier, defaults to the struct name
/// - `#[column(skip)]` / `#[column(name = "...")]` on fields
///
/// Fields named `created_at`, `created_date`, `created_time`, `updated_at`,
/// `updated_date` or `updated_time` become timestamp columns.
///
/// ## Example
///
/// ```text
/// #[derive(Table, Serialize, Deserialize, Clone)]
/// #[serde(rename_all = "camelCase")]
/// pub struct Author {
///     pub author_id: Option<i64>,
///     pub name: String,
///     pub created_at: Option<GatewayDatetime>,
///     pub updated_at: Option<GatewayDatetime>,
/// }
/// ```
#[proc_macro_derive(Table, attributes(table, column))]
pub fn derive_table(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("Table only supports structs with named fields"),
        },
        _ => panic!("Table only supports structs"),
    };

    let attrs = match parse_table_attr(&input) {
        Ok(attrs) => attrs,
        Err(e) => return e.to_compile_error().into(),
    };
    let camel = serde_camel_case(&input);

    let table_name = attrs
        .name
        .unwrap_or_else(|| to_snake_case(&name.to_string()));
    let entity_type = attrs.entity.unwrap_or_else(|| name.to_string());
    let primary_key = attrs
        .primary_key
        .unwrap_or_else(|| format!("{}_id", table_name));
    let insert_serial = attrs.insert_serial.unwrap_or(true);

    // Collect column names, types, and JSON keys for all non-skipped fields
    let mut column_names: Vec<String> = Vec::new();
    let mut column_types: Vec<&'static str> = Vec::new();
    let mut json_keys: Vec<String> = Vec::new();

    for field in fields.iter() {
        if has_column_skip(field) {
            continue;
        }
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_name = field_name.to_string();
        let field_name = field_name.strip_prefix("r#").unwrap_or(&field_name);

        let col_name = get_column_name(field).unwrap_or_else(|| field_name.to_string());
        let json_key = serde_rename(field).unwrap_or_else(|| {
            if camel {
                to_camel_case(field_name)
            } else {
                field_name.to_string()
            }
        });

        column_names.push(col_name);
        column_types.push(rust_type_to_sql_type(&field.ty));
        json_keys.push(json_key);
    }

    let [created_at, created_date, created_time, updated_at, updated_date, updated_time] =
        TIMESTAMP_COLUMNS.map(|column| optional_column(&column_names, column));

    let column_literals: Vec<_> = column_names.iter().map(|s| s.as_str()).collect();
    let json_key_literals: Vec<_> = json_keys.iter().map(|s| s.as_str()).collect();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics table_gateway::Table for #name #ty_generics #where_clause {
            fn entity_type() -> &'static str {
                #entity_type
            }

            fn table_name() -> &'static str {
                #table_name
            }

            fn primary_key() -> &'static str {
                #primary_key
            }

            fn columns() -> &'static [&'static str] {
                &[#(#column_literals),*]
            }

            fn json_keys() -> &'static [&'static str] {
                &[#(#json_key_literals),*]
            }

            fn column_types() -> &'static [&'static str] {
                &[#(#column_types),*]
            }

            fn insert_serial() -> bool {
                #insert_serial
            }

            fn timestamps() -> table_gateway::Timestamps {
                table_gateway::Timestamps {
                    created_at: #created_at,
                    created_date: #created_date,
                    created_time: #created_time,
                    updated_at: #updated_at,
                    updated_date: #updated_date,
                    updated_time: #updated_time,
                }
            }
        }
    };

    TokenStream::from(expanded)
}
