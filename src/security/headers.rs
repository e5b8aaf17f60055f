//! Protective response header set
//!
//! Headers are only ever added when the response does not carry them yet,
//! so a handler that deliberately sets e.g. `X-Frame-Options: SAMEORIGIN`
//! keeps its value.

use crate::config::SecurityHeadersConfig;
use crate::http::Response;

/// Content Security Policy builder
#[derive(Clone, Debug)]
pub struct ContentSecurityPolicy {
    directives: Vec<(String, Vec<String>)>,
    upgrade_insecure_requests: bool,
}

impl Default for ContentSecurityPolicy {
    fn default() -> Self {
        Self {
            directives: vec![
                ("default-src".to_string(), vec!["'self'".to_string()]),
                ("object-src".to_string(), vec!["'none'".to_string()]),
                ("frame-ancestors".to_string(), vec!["'none'".to_string()]),
                ("base-uri".to_string(), vec!["'self'".to_string()]),
            ],
            upgrade_insecure_requests: false,
        }
    }
}

impl ContentSecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add sources to a directive, creating it if needed
    pub fn directive(mut self, name: &str, sources: &[&str]) -> Self {
        let sources = sources.iter().map(|s| s.to_string());
        match self.directives.iter().position(|(existing, _)| existing == name) {
            Some(idx) => {
                let values = &mut self.directives[idx].1;
                for source in sources {
                    if !values.contains(&source) {
                        values.push(source);
                    }
                }
            }
            None => self.directives.push((name.to_string(), sources.collect())),
        }
        self
    }

    pub fn allow_script_src(self, src: &str) -> Self {
        self.directive("script-src", &[src])
    }

    pub fn allow_style_src(self, src: &str) -> Self {
        self.directive("style-src", &[src])
    }

    pub fn upgrade_insecure_requests(mut self) -> Self {
        self.upgrade_insecure_requests = true;
        self
    }

    /// Convert to CSP header value
    pub fn to_header_value(&self) -> String {
        let mut parts: Vec<String> = self
            .directives
            .iter()
            .filter(|(_, sources)| !sources.is_empty())
            .map(|(name, sources)| format!("{} {}", name, sources.join(" ")))
            .collect();

        if self.upgrade_insecure_requests {
            parts.push("upgrade-insecure-requests".to_string());
        }

        parts.join("; ")
    }
}

/// Baseline header values applied by the security headers stage
#[derive(Clone, Debug)]
pub struct SecurityHeaders {
    headers: Vec<(&'static str, String)>,
}

impl SecurityHeaders {
    pub fn from_config(config: &SecurityHeadersConfig) -> Self {
        let mut hsts = format!("max-age={}", config.hsts_max_age);
        if config.hsts_include_subdomains {
            hsts.push_str("; includeSubDomains");
        }

        let mut headers = vec![
            ("X-Content-Type-Options", "nosniff".to_string()),
            ("X-Frame-Options", config.frame_options.clone()),
            ("Referrer-Policy", config.referrer_policy.clone()),
            ("Strict-Transport-Security", hsts),
            ("Permissions-Policy", config.permissions_policy.clone()),
            (
                "Cross-Origin-Embedder-Policy",
                config.cross_origin_embedder_policy.clone(),
            ),
            (
                "Cross-Origin-Opener-Policy",
                config.cross_origin_opener_policy.clone(),
            ),
            (
                "Cross-Origin-Resource-Policy",
                config.cross_origin_resource_policy.clone(),
            ),
            (
                "Cache-Control",
                "no-store, no-cache, must-revalidate".to_string(),
            ),
            ("Pragma", "no-cache".to_string()),
        ];

        if let Some(csp) = &config.content_security_policy {
            headers.push(("Content-Security-Policy", csp.clone()));
        }

        // an empty value disables the header
        headers.retain(|(_, value)| !value.trim().is_empty());
        Self { headers }
    }

    pub fn with_csp(mut self, csp: &ContentSecurityPolicy) -> Self {
        self.headers.retain(|(name, _)| *name != "Content-Security-Policy");
        self.headers
            .push(("Content-Security-Policy", csp.to_header_value()));
        self
    }

    pub fn headers(&self) -> &[(&'static str, String)] {
        &self.headers
    }

    /// Add every header the response does not carry yet
    pub fn apply(&self, response: &mut Response) {
        for (name, value) in &self.headers {
            response.set_header_if_absent(name, value);
        }
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::from_config(&SecurityHeadersConfig::default())
    }
}
