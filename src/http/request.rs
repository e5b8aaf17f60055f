use crate::auth::Principal;
use crate::error::{Error, Result};
use hyper::body::HttpBody;
use hyper::{Body, Request as HyperRequest};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Inbound HTTP request as seen by the pipeline
///
/// Parameters are held as JSON values so that nested form fields
/// (`user[name]=x`, `tags[]=a`) and JSON payloads share one shape and
/// can be walked by the input guards without caring where they came from.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    /// Path plus query string, as received
    pub uri: String,
    /// Decoded and normalised path, see [`normalize_path`]
    pub path: String,
    /// Header names are stored lowercased
    pub headers: HashMap<String, String>,
    pub query: Map<String, Value>,
    /// Form-encoded body parameters
    pub body: Map<String, Value>,
    /// Parsed payload of a JSON request
    pub json: Option<Value>,
    pub client_ip: String,
    pub session_id: Option<String>,
    pub principal: Option<Principal>,
}

impl Request {
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, parse_params(query)),
            None => (uri, Map::new()),
        };

        Self {
            method: method.to_ascii_uppercase(),
            uri: uri.to_string(),
            path: normalize_path(path),
            query,
            client_ip: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    /// Build a request from raw parts, parsing the body by content type
    pub fn from_parts(
        method: &str,
        uri: &str,
        headers: HashMap<String, String>,
        body: &[u8],
        client_ip: &str,
    ) -> Result<Self> {
        let mut request = Self::new(method, uri);
        request.client_ip = client_ip.to_string();
        request.headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        if !body.is_empty() {
            if request.is_json() {
                request.json = Some(serde_json::from_slice(body)?);
            } else if request
                .header("content-type")
                .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
                .unwrap_or(false)
            {
                request.body = parse_params(&String::from_utf8_lossy(body));
            }
        }

        Ok(request)
    }

    /// Convert a hyper request, refusing bodies over `max_body_bytes`
    ///
    /// A declared `Content-Length` over the limit is refused before any of
    /// the body is read; otherwise the body is read chunk by chunk and
    /// reading stops once the limit is passed.
    pub async fn from_hyper(
        req: HyperRequest<Body>,
        remote: SocketAddr,
        max_body_bytes: usize,
    ) -> Result<Self> {
        let method = req.method().to_string();
        let uri = req.uri().to_string();

        let mut headers = HashMap::new();
        for (name, value) in req.headers() {
            if let Ok(value_str) = value.to_str() {
                headers.insert(name.to_string(), value_str.to_string());
            }
        }

        let too_large = Error::PayloadTooLarge {
            limit: max_body_bytes,
        };
        let declared = headers
            .get("content-length")
            .and_then(|len| len.parse::<usize>().ok());
        if declared.map(|len| len > max_body_bytes).unwrap_or(false) {
            return Err(too_large);
        }

        let mut body = req.into_body();
        let mut body_bytes = Vec::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = body.data().await {
            let chunk = chunk?;
            if body_bytes.len() + chunk.len() > max_body_bytes {
                return Err(too_large);
            }
            body_bytes.extend_from_slice(&chunk);
        }

        Self::from_parts(&method, &uri, headers, &body_bytes, &remote.ip().to_string())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn with_body_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.body.insert(name.to_string(), value.into());
        self
    }

    pub fn with_json(mut self, payload: Value) -> Self {
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.json = Some(payload);
        self
    }

    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip = ip.to_string();
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }

    /// Token from an `Authorization: Bearer` header
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization()?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            Some(token.trim())
        } else {
            None
        }
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.header("cookie")?.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
    }

    /// Session id bound to the request, falling back to the session cookie
    pub fn session(&self, cookie_name: &str) -> Option<String> {
        self.session_id
            .clone()
            .or_else(|| self.cookie(cookie_name))
            .filter(|id| !id.is_empty())
    }

    /// Client address, honouring proxy headers when asked to
    pub fn ip(&self, trust_proxy: bool) -> String {
        if trust_proxy {
            if let Some(forwarded) = self
                .header("x-forwarded-for")
                .and_then(|h| h.split(',').next())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
            {
                return forwarded.to_string();
            }
            if let Some(real_ip) = self.header("x-real-ip") {
                return real_ip.to_string();
            }
        }
        self.client_ip.clone()
    }

    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    /// Whether the client expects JSON rather than an HTML page
    pub fn expects_json(&self) -> bool {
        if self.is_json() || self.header("x-requested-with") == Some("XMLHttpRequest") {
            return true;
        }
        match self.header("accept") {
            Some(accept) => {
                accept.contains("json") || !(accept.contains("text/html") || accept.contains("*/*"))
            }
            None => true,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD" | "OPTIONS")
    }

    /// Look up an input value in body, JSON payload, then query
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.body
            .get(name)
            .or_else(|| self.json.as_ref().and_then(|json| json.get(name)))
            .or_else(|| self.query.get(name))
    }

    /// All inputs merged into one object (query < body < JSON)
    pub fn all_input(&self) -> Value {
        let mut merged = self.query.clone();
        merged.extend(self.body.clone());
        if let Some(Value::Object(json)) = &self.json {
            merged.extend(json.clone());
        }
        Value::Object(merged)
    }
}

/// Canonical form of a request path
///
/// Percent-escapes are decoded, empty and `.` segments dropped and `..`
/// resolved without climbing above the root, so `/%61dmin//users/./` and
/// `/admin/users` are the same path to every stage.
pub fn normalize_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Parse an urlencoded string into nested parameters
///
/// Supports `tags[]=a&tags[]=b` (arrays) and `user[name]=x` (maps).
pub fn parse_params(encoded: &str) -> Map<String, Value> {
    let mut result = Map::new();

    for pair in encoded.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        let value = decode_component(raw_value);

        let mut segments = Vec::new();
        let base = match key.find('[') {
            Some(idx) if key.ends_with(']') => {
                for part in key[idx + 1..key.len() - 1].split("][") {
                    segments.push(part.to_string());
                }
                key[..idx].to_string()
            }
            _ => key.clone(),
        };

        if base.is_empty() {
            continue;
        }
        insert_param(&mut result, &base, &segments, Value::String(value));
    }

    result
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

fn insert_param(target: &mut Map<String, Value>, key: &str, segments: &[String], value: Value) {
    match segments.split_first() {
        None => {
            target.insert(key.to_string(), value);
        }
        Some((next, rest)) if next.is_empty() => {
            let slot = target
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                if rest.is_empty() {
                    items.push(value);
                } else {
                    let mut nested = Map::new();
                    insert_param(&mut nested, &rest[0], &rest[1..], value);
                    items.push(Value::Object(nested));
                }
            }
        }
        Some((next, rest)) => {
            let slot = target
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(nested) = slot {
                insert_param(nested, next, rest, value);
            }
        }
    }
}
