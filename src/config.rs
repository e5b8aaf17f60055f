use crate::configuration::{ConfigProvider, EnvProvider};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub csrf: CsrfConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,

    #[serde(default)]
    pub sanitization: SanitizationConfig,

    #[serde(default)]
    pub xss: XssConfig,

    #[serde(default)]
    pub sql_injection: SqlInjectionConfig,

    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Larger request bodies are refused with 413 before parsing
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

/// How the rate limiter identifies a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierStrategy {
    #[default]
    Ip,
    User,
    Route,
}

impl FromStr for IdentifierStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "user" => Ok(Self::User),
            "route" => Ok(Self::Route),
            other => Err(Error::config(format!(
                "Unknown rate limit identifier '{}', expected ip, user or route",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_limiter_name")]
    pub name: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
    #[serde(default = "default_decay_minutes")]
    pub decay_minutes: u64,
    #[serde(default)]
    pub identifier: IdentifierStrategy,
    #[serde(default)]
    pub trust_proxy: bool,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_xsrf_cookie")]
    pub cookie_name: String,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_guards")]
    pub guards: Vec<String>,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_auth_excluded")]
    pub excluded_paths: Vec<String>,
}

/// Where role and permission definitions come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoleProviderKind {
    #[default]
    Static,
    Database,
    Cache,
}

impl FromStr for RoleProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "database" => Ok(Self::Database),
            "cache" => Ok(Self::Cache),
            other => Err(Error::config(format!(
                "Unknown role provider '{}', expected static, database or cache",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDefinition {
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Roles and permissions required under a path prefix
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessRule {
    pub path: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub provider: RoleProviderKind,
    #[serde(default = "default_provider_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_super_admin")]
    pub super_admin_role: String,
    #[serde(default)]
    pub roles: HashMap<String, RoleDefinition>,
    #[serde(default)]
    pub rules: Vec<AccessRule>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strip_tags: bool,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XssConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub content_security_policy: Option<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlInjectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeadersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_frame_options")]
    pub frame_options: String,
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age: u64,
    #[serde(default = "default_true")]
    pub hsts_include_subdomains: bool,
    #[serde(default = "default_permissions_policy")]
    pub permissions_policy: String,
    #[serde(default = "default_coep")]
    pub cross_origin_embedder_policy: String,
    #[serde(default = "default_same_origin")]
    pub cross_origin_opener_policy: String,
    #[serde(default = "default_same_origin")]
    pub cross_origin_resource_policy: String,
    #[serde(default)]
    pub content_security_policy: Option<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_vary_headers")]
    pub vary_headers: Vec<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_compression_level")]
    pub level: u32,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_slow_threshold")]
    pub slow_threshold_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_limiter_name() -> String {
    "global".to_string()
}
fn default_max_attempts() -> u64 {
    60
}
fn default_decay_minutes() -> u64 {
    1
}
fn default_session_cookie() -> String {
    "warden_session".to_string()
}
fn default_xsrf_cookie() -> String {
    "XSRF-TOKEN".to_string()
}
fn default_guards() -> Vec<String> {
    vec!["bearer".to_string(), "session".to_string()]
}
fn default_login_url() -> String {
    "/login".to_string()
}
fn default_auth_excluded() -> Vec<String> {
    vec!["/login".to_string(), "/health".to_string()]
}
fn default_provider_cache_ttl() -> u64 {
    300
}
fn default_super_admin() -> String {
    "super_admin".to_string()
}
fn default_frame_options() -> String {
    "DENY".to_string()
}
fn default_referrer_policy() -> String {
    "strict-origin-when-cross-origin".to_string()
}
fn default_hsts_max_age() -> u64 {
    31_536_000
}
fn default_permissions_policy() -> String {
    "camera=(), microphone=(), geolocation=()".to_string()
}
fn default_coep() -> String {
    "require-corp".to_string()
}
fn default_same_origin() -> String {
    "same-origin".to_string()
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_vary_headers() -> Vec<String> {
    vec!["accept-encoding".to_string()]
}
fn default_min_size() -> usize {
    1024
}
fn default_compression_level() -> u32 {
    6
}
fn default_slow_threshold() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            enabled: true,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_limiter_name(),
            max_attempts: default_max_attempts(),
            decay_minutes: default_decay_minutes(),
            identifier: IdentifierStrategy::Ip,
            trust_proxy: false,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_cookie: default_session_cookie(),
            cookie_name: default_xsrf_cookie(),
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guards: default_guards(),
            login_url: default_login_url(),
            excluded_paths: default_auth_excluded(),
        }
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: RoleProviderKind::Static,
            cache_ttl_secs: default_provider_cache_ttl(),
            super_admin_role: default_super_admin(),
            roles: HashMap::new(),
            rules: Vec::new(),
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strip_tags: false,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for XssConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_security_policy: None,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for SqlInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_options: default_frame_options(),
            referrer_policy: default_referrer_policy(),
            hsts_max_age: default_hsts_max_age(),
            hsts_include_subdomains: true,
            permissions_policy: default_permissions_policy(),
            cross_origin_embedder_policy: default_coep(),
            cross_origin_opener_policy: default_same_origin(),
            cross_origin_resource_policy: default_same_origin(),
            content_security_policy: None,
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            vary_headers: default_vary_headers(),
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: default_min_size(),
            level: default_compression_level(),
            excluded_paths: Vec::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_threshold_ms: default_slow_threshold(),
        }
    }
}

impl WardenConfig {
    /// Load `path` and apply `WARDEN_*` environment overrides on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(&EnvProvider::default())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(&EnvProvider::default())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}. Make sure the file exists and is readable.",
                path_ref.display(),
                e
            ))
        })?;

        let config = Self::from_toml_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}. Check TOML syntax.",
                path_ref.display(),
                e
            ))
        })?;

        log::debug!(
            "Successfully loaded configuration from: {}",
            path_ref.display()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply provider values over the current configuration
    ///
    /// Provider values always win over file values. List values are
    /// comma-separated.
    pub fn apply_overrides(&mut self, provider: &dyn ConfigProvider) -> Result<()> {
        override_value(provider, "server.host", &mut self.server.host)?;
        override_value(provider, "server.port", &mut self.server.port)?;
        override_value(provider, "server.max_body_bytes", &mut self.server.max_body_bytes)?;
        override_value(provider, "logging.level", &mut self.logging.level)?;
        override_value(provider, "logging.enabled", &mut self.logging.enabled)?;
        override_list(provider, "logging.excluded_paths", &mut self.logging.excluded_paths);

        let rl = &mut self.rate_limit;
        override_value(provider, "rate_limit.enabled", &mut rl.enabled)?;
        override_value(provider, "rate_limit.name", &mut rl.name)?;
        override_value(provider, "rate_limit.max_attempts", &mut rl.max_attempts)?;
        override_value(provider, "rate_limit.decay_minutes", &mut rl.decay_minutes)?;
        override_value(provider, "rate_limit.identifier", &mut rl.identifier)?;
        override_value(provider, "rate_limit.trust_proxy", &mut rl.trust_proxy)?;
        override_list(provider, "rate_limit.excluded_paths", &mut rl.excluded_paths);

        let csrf = &mut self.csrf;
        override_value(provider, "csrf.enabled", &mut csrf.enabled)?;
        override_value(provider, "csrf.session_cookie", &mut csrf.session_cookie)?;
        override_value(provider, "csrf.cookie_name", &mut csrf.cookie_name)?;
        override_list(provider, "csrf.excluded_paths", &mut csrf.excluded_paths);

        let auth = &mut self.auth;
        override_value(provider, "auth.enabled", &mut auth.enabled)?;
        override_list(provider, "auth.guards", &mut auth.guards);
        override_value(provider, "auth.login_url", &mut auth.login_url)?;
        override_list(provider, "auth.excluded_paths", &mut auth.excluded_paths);

        let authz = &mut self.authorization;
        override_value(provider, "authorization.enabled", &mut authz.enabled)?;
        override_value(provider, "authorization.provider", &mut authz.provider)?;
        override_value(provider, "authorization.cache_ttl_secs", &mut authz.cache_ttl_secs)?;
        override_value(provider, "authorization.super_admin_role", &mut authz.super_admin_role)?;
        override_list(provider, "authorization.excluded_paths", &mut authz.excluded_paths);

        let san = &mut self.sanitization;
        override_value(provider, "sanitization.enabled", &mut san.enabled)?;
        override_value(provider, "sanitization.strip_tags", &mut san.strip_tags)?;
        override_list(provider, "sanitization.excluded_paths", &mut san.excluded_paths);

        let xss = &mut self.xss;
        override_value(provider, "xss.enabled", &mut xss.enabled)?;
        override_optional(provider, "xss.content_security_policy", &mut xss.content_security_policy);
        override_list(provider, "xss.excluded_paths", &mut xss.excluded_paths);

        let sqli = &mut self.sql_injection;
        override_value(provider, "sql_injection.enabled", &mut sqli.enabled)?;
        override_list(provider, "sql_injection.excluded_paths", &mut sqli.excluded_paths);

        let headers = &mut self.security_headers;
        override_value(provider, "security_headers.enabled", &mut headers.enabled)?;
        override_value(provider, "security_headers.frame_options", &mut headers.frame_options)?;
        override_value(provider, "security_headers.referrer_policy", &mut headers.referrer_policy)?;
        override_value(provider, "security_headers.hsts_max_age", &mut headers.hsts_max_age)?;
        override_value(
            provider,
            "security_headers.hsts_include_subdomains",
            &mut headers.hsts_include_subdomains,
        )?;
        override_value(
            provider,
            "security_headers.permissions_policy",
            &mut headers.permissions_policy,
        )?;
        override_value(
            provider,
            "security_headers.cross_origin_embedder_policy",
            &mut headers.cross_origin_embedder_policy,
        )?;
        override_value(
            provider,
            "security_headers.cross_origin_opener_policy",
            &mut headers.cross_origin_opener_policy,
        )?;
        override_value(
            provider,
            "security_headers.cross_origin_resource_policy",
            &mut headers.cross_origin_resource_policy,
        )?;
        override_optional(
            provider,
            "security_headers.content_security_policy",
            &mut headers.content_security_policy,
        );
        override_list(
            provider,
            "security_headers.excluded_paths",
            &mut headers.excluded_paths,
        );

        let cache = &mut self.cache;
        override_value(provider, "cache.enabled", &mut cache.enabled)?;
        override_value(provider, "cache.ttl_secs", &mut cache.ttl_secs)?;
        override_list(provider, "cache.vary_headers", &mut cache.vary_headers);
        override_list(provider, "cache.excluded_paths", &mut cache.excluded_paths);

        let gzip = &mut self.compression;
        override_value(provider, "compression.enabled", &mut gzip.enabled)?;
        override_value(provider, "compression.min_size", &mut gzip.min_size)?;
        override_value(provider, "compression.level", &mut gzip.level)?;
        override_list(provider, "compression.excluded_paths", &mut gzip.excluded_paths);

        override_value(provider, "timing.enabled", &mut self.timing.enabled)?;
        override_value(
            provider,
            "timing.slow_threshold_ms",
            &mut self.timing.slow_threshold_ms,
        )?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.max_body_bytes == 0 {
            return Err(Error::config("server.max_body_bytes must be at least 1"));
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(Error::config("rate_limit.max_attempts must be at least 1"));
        }
        if self.rate_limit.decay_minutes == 0 {
            return Err(Error::config("rate_limit.decay_minutes must be at least 1"));
        }
        if self.compression.level > 9 {
            return Err(Error::config(format!(
                "compression.level must be between 0 and 9, got {}",
                self.compression.level
            )));
        }
        for rule in &self.authorization.rules {
            if !rule.path.starts_with('/') {
                return Err(Error::config(format!(
                    "authorization rule path '{}' must start with '/'",
                    rule.path
                )));
            }
        }
        Ok(())
    }
}

fn override_value<T>(provider: &dyn ConfigProvider, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
{
    if let Some(raw) = provider.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid value '{}' for {}", raw, key)))?;
    }
    Ok(())
}

fn override_optional(provider: &dyn ConfigProvider, key: &str, target: &mut Option<String>) {
    if let Some(raw) = provider.get(key) {
        *target = if raw.trim().is_empty() { None } else { Some(raw) };
    }
}

fn override_list(provider: &dyn ConfigProvider, key: &str, target: &mut Vec<String>) {
    if let Some(raw) = provider.get(key) {
        *target = raw
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
    }
}
