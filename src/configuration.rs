//! Key/value configuration sources
//!
//! Keys are dot paths such as `rate_limit.max_attempts`. Each provider maps
//! them onto its own backing store, so overrides can come from the process
//! environment in production and from a plain map in tests.

use std::collections::HashMap;
use std::env;

pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)
            .and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            })
    }

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Reads `PREFIX_SECTION_FIELD` variables from the process environment
#[derive(Debug, Clone)]
pub struct EnvProvider {
    prefix: String,
}

impl EnvProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable name for a dot-path key
    pub fn var_name(&self, key: &str) -> String {
        format!(
            "{}_{}",
            self.prefix,
            key.replace(['.', '-'], "_").to_ascii_uppercase()
        )
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new("WARDEN")
    }
}

impl ConfigProvider for EnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        env::var(self.var_name(key)).ok()
    }
}

/// In-memory provider, mostly for tests
#[derive(Debug, Clone, Default)]
pub struct MapProvider {
    values: HashMap<String, String>,
}

impl MapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }
}

impl ConfigProvider for MapProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Dot-path lookups into a parsed TOML document
#[derive(Debug, Clone)]
pub struct TomlProvider {
    root: toml::Value,
}

impl TomlProvider {
    pub fn new(root: toml::Value) -> Self {
        Self { root }
    }

    pub fn from_str(content: &str) -> crate::error::Result<Self> {
        Ok(Self::new(toml::from_str(content)?))
    }

    fn get_nested(&self, path: &str) -> Option<&toml::Value> {
        let mut current = &self.root;
        for part in path.split('.') {
            match current {
                toml::Value::Table(table) => current = table.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

impl ConfigProvider for TomlProvider {
    fn get(&self, key: &str) -> Option<String> {
        scalar_to_string(self.get_nested(key)?)
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}
