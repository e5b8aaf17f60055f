//! Standard pipeline assembly
//!
//! [`Services`] carries everything the stages share across requests
//! (stores, token manager, guards, role provider, logger).
//! [`Pipeline::standard`] reads a [`WardenConfig`] and registers the
//! enabled stages in their fixed order:
//!
//! logging, rate_limit, csrf, auth, authz, sanitization, xss, sqli,
//! security_headers, cache, compression, timing

use crate::auth::{
    AccessControl, CachedRoleProvider, Guard, RoleHierarchy, RoleProvider, StaticRoleProvider,
};
use crate::cache::{CacheStore, CachedResponse, MemoryCache, MemoryRateLimitStore, RateLimitStore};
use crate::config::{AuthorizationConfig, RoleProviderKind, WardenConfig};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::middleware::builtin::{
    Authentication, Authorization, CsrfProtection, InputSanitizer, RateLimiter, RequestLogger,
    ResponseCache, ResponseCompression, ResponseTimeTracker, SecurityHeadersStage,
    SqlInjectionGuard, XssProtection,
};
use crate::middleware::{Handler, PathExclusions, Pipeline};
use crate::security::CsrfTokenManager;
use std::sync::Arc;
use std::time::Duration;

/// Shared state injected into the standard stages
#[derive(Clone)]
pub struct Services {
    pub logger: Logger,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub cache: Arc<dyn CacheStore>,
    pub csrf: Arc<CsrfTokenManager>,
    pub guards: Vec<Arc<dyn Guard>>,
    /// Backing store for `database` and `cache` role providers
    pub role_provider: Option<Arc<dyn RoleProvider>>,
}

impl Services {
    /// In-memory stores, a fresh token manager and no guards
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            rate_limits: Arc::new(MemoryRateLimitStore::new()),
            cache: Arc::new(MemoryCache::<CachedResponse>::new()),
            csrf: Arc::new(CsrfTokenManager::new()),
            guards: Vec::new(),
            role_provider: None,
        }
    }

    pub fn with_rate_limits(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limits = store;
        self
    }

    pub fn with_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = store;
        self
    }

    pub fn with_csrf(mut self, tokens: Arc<CsrfTokenManager>) -> Self {
        self.csrf = tokens;
        self
    }

    pub fn with_guard<G: Guard>(mut self, guard: G) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn with_role_provider(mut self, provider: Arc<dyn RoleProvider>) -> Self {
        self.role_provider = Some(provider);
        self
    }

    /// Guards named in `names`, in that order
    fn select_guards(&self, names: &[String]) -> Result<Vec<Arc<dyn Guard>>> {
        names
            .iter()
            .map(|name| {
                self.guards
                    .iter()
                    .find(|guard| guard.name() == name)
                    .cloned()
                    .ok_or_else(|| {
                        Error::config(format!(
                            "auth.guards names '{}' but no such guard was supplied",
                            name
                        ))
                    })
            })
            .collect()
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(Logger::default())
    }
}

/// Access control for the configured provider kind
///
/// - `static`: the supplied provider, or the principal's own grants
/// - `database`: the supplied provider, which is required
/// - `cache`: the supplied (or static) provider memoised for `cache_ttl_secs`
pub fn access_control(
    config: &AuthorizationConfig,
    provider: Option<Arc<dyn RoleProvider>>,
) -> Result<AccessControl> {
    let hierarchy = RoleHierarchy::from_definitions(&config.roles)?;

    let provider: Arc<dyn RoleProvider> = match (config.provider, provider) {
        (RoleProviderKind::Static, Some(provider)) => provider,
        (RoleProviderKind::Static, None) => Arc::new(StaticRoleProvider::new()),
        (RoleProviderKind::Database, Some(provider)) => provider,
        (RoleProviderKind::Database, None) => {
            return Err(Error::config(
                "authorization.provider is 'database' but no role provider was supplied",
            ))
        }
        (RoleProviderKind::Cache, inner) => {
            let inner = inner.unwrap_or_else(|| Arc::new(StaticRoleProvider::new()));
            Arc::new(CachedRoleProvider::new(
                inner,
                Duration::from_secs(config.cache_ttl_secs),
            ))
        }
    };

    Ok(AccessControl::new(hierarchy, provider).with_super_admin(config.super_admin_role.clone()))
}

impl Pipeline {
    /// The default stage chain for `config` in front of `handler`
    pub fn standard<H: Handler>(
        config: &WardenConfig,
        services: Services,
        handler: H,
    ) -> Result<Pipeline> {
        config.validate()?;

        let logger = services.logger.clone();
        let mut builder = Pipeline::builder().logger(logger.clone());

        if config.logging.enabled {
            builder = builder.dual(
                "logging",
                RequestLogger::new(logger.clone())
                    .with_exclusions(PathExclusions::new(config.logging.excluded_paths.clone())),
            );
        }

        if config.rate_limit.enabled {
            builder = builder.dual(
                "rate_limit",
                RateLimiter::from_config(&config.rate_limit, services.rate_limits.clone())
                    .with_logger(logger.clone())
                    .with_exclusions(PathExclusions::new(config.rate_limit.excluded_paths.clone())),
            );
        }

        if config.csrf.enabled {
            builder = builder.dual(
                "csrf",
                CsrfProtection::from_config(&config.csrf, services.csrf.clone())
                    .with_logger(logger.clone())
                    .with_exclusions(PathExclusions::new(config.csrf.excluded_paths.clone())),
            );
        }

        if config.auth.enabled {
            builder = builder.inbound(
                "auth",
                Authentication::new(services.select_guards(&config.auth.guards)?)
                    .login_url(&config.auth.login_url)
                    .with_logger(logger.clone())
                    .with_exclusions(PathExclusions::new(config.auth.excluded_paths.clone())),
            );
        }

        if config.authorization.enabled {
            let authz = &config.authorization;
            let access = access_control(authz, services.role_provider.clone())?;
            builder = builder.inbound(
                "authz",
                Authorization::new(Arc::new(access))
                    .with_rules(authz.rules.clone())
                    .with_logger(logger.clone())
                    .with_exclusions(PathExclusions::new(authz.excluded_paths.clone())),
            );
        }

        if config.sanitization.enabled {
            builder = builder.inbound(
                "sanitization",
                InputSanitizer::from_config(&config.sanitization).with_exclusions(
                    PathExclusions::new(config.sanitization.excluded_paths.clone()),
                ),
            );
        }

        if config.xss.enabled {
            builder = builder.dual(
                "xss",
                XssProtection::from_config(&config.xss)
                    .with_logger(logger.clone())
                    .with_exclusions(PathExclusions::new(config.xss.excluded_paths.clone())),
            );
        }

        if config.sql_injection.enabled {
            builder = builder.inbound(
                "sqli",
                SqlInjectionGuard::new()
                    .with_logger(logger.clone())
                    .with_exclusions(PathExclusions::new(
                        config.sql_injection.excluded_paths.clone(),
                    )),
            );
        }

        if config.security_headers.enabled {
            builder = builder.outbound(
                "security_headers",
                SecurityHeadersStage::from_config(&config.security_headers).with_exclusions(
                    PathExclusions::new(config.security_headers.excluded_paths.clone()),
                ),
            );
        }

        if config.cache.enabled {
            builder = builder.dual(
                "cache",
                ResponseCache::from_config(&config.cache, services.cache.clone())
                    .with_exclusions(PathExclusions::new(config.cache.excluded_paths.clone())),
            );
        }

        if config.compression.enabled {
            builder = builder.outbound(
                "compression",
                ResponseCompression::from_config(&config.compression).with_exclusions(
                    PathExclusions::new(config.compression.excluded_paths.clone()),
                ),
            );
        }

        if config.timing.enabled {
            builder = builder.dual(
                "timing",
                ResponseTimeTracker::from_config(&config.timing).with_logger(logger.clone()),
            );
        }

        let pipeline = builder.handler(handler).build();
        log::info!("Pipeline ready: {}", pipeline.stage_names().join(" -> "));
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{BearerTokenGuard, Principal, SessionGuard, StaticTokenResolver};
    use crate::config::RoleDefinition;
    use crate::http::{Request, Response};
    use crate::middleware::FnHandler;

    fn services() -> Services {
        let resolver = StaticTokenResolver::new().with_token("t-1", Principal::new("1"));
        Services::default()
            .with_guard(BearerTokenGuard::new(Arc::new(resolver)))
            .with_guard(SessionGuard::new("warden_session"))
    }

    fn ok_handler() -> FnHandler<fn(&Request) -> Result<Response>> {
        fn ok(_req: &Request) -> Result<Response> {
            Ok(Response::text("ok"))
        }
        FnHandler(ok as fn(&Request) -> Result<Response>)
    }

    #[test]
    fn test_standard_order() {
        let pipeline = Pipeline::standard(&WardenConfig::default(), services(), ok_handler()).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "logging",
                "rate_limit",
                "csrf",
                "auth",
                "authz",
                "sanitization",
                "xss",
                "sqli",
                "security_headers",
                "cache",
                "compression",
                "timing",
            ]
        );
    }

    #[test]
    fn test_disabled_sections_are_left_out() {
        let mut config = WardenConfig::default();
        config.csrf.enabled = false;
        config.cache.enabled = false;
        config.timing.enabled = false;

        let pipeline = Pipeline::standard(&config, services(), ok_handler()).unwrap();
        let names = pipeline.stage_names();
        assert!(!names.contains(&"csrf"));
        assert!(!names.contains(&"cache"));
        assert!(!names.contains(&"timing"));
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn test_unknown_guard_is_a_config_error() {
        let mut config = WardenConfig::default();
        config.auth.guards = vec!["bearer".to_string(), "ldap".to_string()];

        let err = Pipeline::standard(&config, services(), ok_handler()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("ldap"));
    }

    #[test]
    fn test_database_provider_must_be_supplied() {
        let mut config = AuthorizationConfig::default();
        config.provider = RoleProviderKind::Database;
        assert!(access_control(&config, None).is_err());

        let provider: Arc<dyn RoleProvider> = Arc::new(StaticRoleProvider::new());
        assert!(access_control(&config, Some(provider)).is_ok());
    }

    #[tokio::test]
    async fn test_cached_provider_uses_configured_roles() {
        let mut config = AuthorizationConfig::default();
        config.provider = RoleProviderKind::Cache;
        config.roles.insert(
            "editor".to_string(),
            RoleDefinition {
                inherits: Vec::new(),
                permissions: vec!["posts.edit".to_string()],
            },
        );
        let provider: Arc<dyn RoleProvider> =
            Arc::new(StaticRoleProvider::new().assign("5", &["editor"], &[]));

        let access = access_control(&config, Some(provider)).unwrap();
        let required = vec!["posts.edit".to_string()];
        assert!(access
            .check_permissions(&Principal::new("5"), &required)
            .await
            .unwrap());
        assert!(!access
            .check_permissions(&Principal::new("6"), &required)
            .await
            .unwrap());
    }
}
