//! Path exclusion for stages
//!
//! Patterns are either exact paths (`/health`) or a prefix followed by
//! `/*` (`/webhooks/*`), which matches the prefix itself and anything
//! below it, but not `/webhooksfoo`. Matching runs on the normalised
//! [`Request::path`](crate::http::Request::path).

use crate::http::Request;

/// Decides whether a stage is skipped for a request
pub trait ExclusionPolicy: Send + Sync + 'static {
    fn is_excluded(&self, req: &Request) -> bool;
}

/// Never excludes anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExclusions;

impl ExclusionPolicy for NoExclusions {
    fn is_excluded(&self, _req: &Request) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathExclusions {
    patterns: Vec<String>,
}

impl PathExclusions {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| matches_pattern(path, pattern))
    }
}

impl ExclusionPolicy for PathExclusions {
    fn is_excluded(&self, req: &Request) -> bool {
        self.matches(&req.path)
    }
}

fn matches_pattern(path: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        // the prefix must be followed by a separator or end the path
        return match path.strip_prefix(prefix) {
            Some(remaining) => remaining.is_empty() || remaining.starts_with('/'),
            None => false,
        };
    }
    path == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard_patterns() {
        let exclusions = PathExclusions::new(["/health", "/webhooks/*"]);

        assert!(exclusions.matches("/health"));
        assert!(!exclusions.matches("/health/deep"));
        assert!(exclusions.matches("/webhooks"));
        assert!(exclusions.matches("/webhooks/stripe/events"));
        assert!(!exclusions.matches("/webhooksfoo"));
        assert!(!exclusions.matches("/api"));
    }

    #[test]
    fn test_policy_reads_request_path() {
        let exclusions = PathExclusions::new(["/status"]);

        assert!(exclusions.is_excluded(&Request::new("GET", "/status?verbose=1")));
        assert!(!NoExclusions.is_excluded(&Request::new("GET", "/status")));
    }

    #[test]
    fn test_policy_sees_normalised_path() {
        let exclusions = PathExclusions::new(["/status", "/webhooks/*"]);

        assert!(exclusions.is_excluded(&Request::new("GET", "//status/")));
        assert!(exclusions.is_excluded(&Request::new("GET", "/%73tatus")));
        assert!(exclusions.is_excluded(&Request::new("POST", "/webhooks//stripe")));
        assert!(!exclusions.is_excluded(&Request::new("GET", "/webhooks/../admin")));
    }
}
