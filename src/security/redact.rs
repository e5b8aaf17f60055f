use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

/// Fragments that mark a field name as sensitive
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "credit_card",
    "card_number",
    "cvv",
    "ssn",
    "private_key",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace('-', "_");
    SENSITIVE_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

fn is_uri_key(key: &str) -> bool {
    matches!(key, "url" | "uri" | "referer" | "location")
}

/// Copy of `value` with every sensitive field replaced by `[REDACTED]`, at any depth
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// `uri` with the values of sensitive query parameters replaced
///
/// `/reset?token=abc&lang=en` becomes `/reset?token=[REDACTED]&lang=en`.
pub fn redact_uri(uri: &str) -> String {
    let (path, query) = match uri.split_once('?') {
        Some(parts) => parts,
        None => return uri.to_string(),
    };

    let query = query
        .split('&')
        .map(|pair| {
            let key = pair.split_once('=').map(|(key, _)| key).unwrap_or(pair);
            let decoded = urlencoding::decode(&key.replace('+', " "))
                .map(|key| key.into_owned())
                .unwrap_or_else(|_| key.to_string());
            if is_sensitive_key(&decoded) {
                format!("{}={}", key, REDACTED)
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", path, query)
}

pub fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else if let Some(uri) = value.as_str().filter(|_| is_uri_key(key)) {
                Value::String(redact_uri(uri))
            } else {
                redact_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}
