//! HTML-entity encoding over nested request input
//!
//! Encoding is idempotent: an `&` that already starts a character reference
//! is left alone, so a value that went through the encoder twice is
//! identical to one that went through once.

use crate::security::patterns::{contains_sql_injection, contains_xss};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
        .expect("Invalid entity regex")
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid tag regex"));

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6});")
        .expect("Invalid reference regex")
});

static JS_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(javascript)\s*:").expect("Invalid scheme regex"));

/// Entity-encode `& < > " '`, leaving existing character references intact
pub fn encode_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);

    for (idx, ch) in input.char_indices() {
        match ch {
            '&' if ENTITY.is_match(&input[idx..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }

    out
}

/// Resolve the character references `encode_html` produces, plus numeric ones
///
/// Used by the detectors so that encoding done earlier in the chain does
/// not hide a signature.
pub fn decode_html(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    REFERENCE
        .replace_all(input, |caps: &regex::Captures| {
            let reference = &caps[1];
            match reference {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                numeric => {
                    let code = match numeric
                        .strip_prefix("#x")
                        .or_else(|| numeric.strip_prefix("#X"))
                    {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => numeric[1..].parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                        .map(|ch| ch.to_string())
                        .unwrap_or_else(|| caps[0].to_string())
                }
            }
        })
        .into_owned()
}

/// Remove anything that looks like a tag
pub fn strip_tags(input: &str) -> String {
    TAG.replace_all(input, "").into_owned()
}

/// Encode and defuse `javascript:` URLs
pub fn neutralize_xss(input: &str) -> String {
    JS_SCHEME
        .replace_all(&encode_html(input), "$1&#58;")
        .into_owned()
}

/// Apply `f` to every string leaf, at any depth
///
/// Numbers, booleans and null are left as they are.
pub fn map_strings<F>(value: &mut Value, f: &F)
where
    F: Fn(&str) -> String,
{
    match value {
        Value::String(s) => *s = f(s),
        Value::Array(items) => items.iter_mut().for_each(|item| map_strings(item, f)),
        Value::Object(map) => map_object_strings(map, f),
        _ => {}
    }
}

pub fn map_object_strings<F>(map: &mut Map<String, Value>, f: &F)
where
    F: Fn(&str) -> String,
{
    for value in map.values_mut() {
        map_strings(value, f);
    }
}

/// Visit every string leaf with its dotted field path
///
/// Stops and returns the first `Some` produced by `visit`.
pub fn find_string<T, F>(value: &Value, path: &str, visit: &F) -> Option<T>
where
    F: Fn(&str, &str) -> Option<T>,
{
    match value {
        Value::String(s) => visit(path, s),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(idx, item)| find_string(item, &join_path(path, &idx.to_string()), visit)),
        Value::Object(map) => map
            .iter()
            .find_map(|(key, item)| find_string(item, &join_path(path, key), visit)),
        _ => None,
    }
}

/// Dotted path of the first string leaf carrying a SQL signature
pub fn find_sql_injection(value: &Value, path: &str) -> Option<String> {
    find_string(value, path, &|field: &str, s: &str| {
        contains_sql_injection(&decode_html(s)).then(|| field.to_string())
    })
}

/// Dotted path of the first string leaf carrying an XSS signature
pub fn find_xss(value: &Value, path: &str) -> Option<String> {
    find_string(value, path, &|field: &str, s: &str| {
        contains_xss(&decode_html(s)).then(|| field.to_string())
    })
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}
