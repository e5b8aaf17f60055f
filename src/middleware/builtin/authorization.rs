//! Role and permission checks per path
//!
//! Requirements are declared as rules on a path prefix; the longest prefix
//! covering the request path applies. A rule passes when the principal
//! holds any of its roles and all of its permissions (hierarchy included,
//! `super_admin` always passes).

use crate::auth::AccessControl;
use crate::config::AccessRule;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::Response;
use crate::logging::Logger;
use crate::middleware::{ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions};
use async_trait::async_trait;
use hyper::StatusCode;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub struct Authorization {
    access: Arc<AccessControl>,
    rules: Vec<AccessRule>,
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl Authorization {
    pub fn new(access: Arc<AccessControl>) -> Self {
        Self {
            access,
            rules: Vec::new(),
            logger: Logger::default(),
            exclusions: Arc::new(NoExclusions),
        }
    }

    /// Require `roles` (any) and `permissions` (all) under `path`
    pub fn rule(mut self, path: &str, roles: &[&str], permissions: &[&str]) -> Self {
        self.rules.push(AccessRule {
            path: path.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    pub fn with_rules(mut self, rules: Vec<AccessRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    /// Most specific rule covering `path`
    pub fn rule_for(&self, path: &str) -> Option<&AccessRule> {
        self.rules
            .iter()
            .filter(|rule| covers(&rule.path, path))
            .max_by_key(|rule| rule_prefix(&rule.path).len())
    }

    fn deny(&self, ctx: &Context, message: &str, extra: Map<String, Value>) {
        let mut context = ctx.requester();
        context.insert(
            "principal_id".to_string(),
            json!(ctx.principal().map(|p| p.id.clone())),
        );
        context.extend(extra);
        self.logger.warning(message, context);
    }
}

fn rule_prefix(pattern: &str) -> &str {
    let prefix = pattern.strip_suffix("/*").unwrap_or(pattern);
    prefix.trim_end_matches('/')
}

/// Whether a rule on `pattern` applies to `path`, on segment boundaries
///
/// Case-insensitive, so `/Admin` cannot slip past a rule on `/admin`.
fn covers(pattern: &str, path: &str) -> bool {
    let prefix = rule_prefix(pattern).to_ascii_lowercase();
    if prefix.is_empty() {
        return true;
    }
    match path.to_ascii_lowercase().strip_prefix(prefix.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[async_trait]
impl InboundMiddleware for Authorization {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let rule = match self.rule_for(&ctx.req.path) {
            Some(rule) => rule.clone(),
            None => return Ok(InboundAction::Continue),
        };

        let principal = match ctx.principal() {
            Some(principal) => principal.clone(),
            None => {
                self.deny(ctx, "Unauthenticated access to protected route", Map::new());
                ctx.set_response(Error::unauthenticated("no principal").to_response());
                return Ok(InboundAction::Stop);
            }
        };

        if rule.roles.is_empty() && rule.permissions.is_empty() {
            return Ok(InboundAction::Continue);
        }
        let access = self.access.effective(&principal).await?;

        if !self.access.roles_satisfied(&access, &rule.roles) {
            let mut extra = Map::new();
            extra.insert("required_roles".to_string(), json!(rule.roles));
            self.deny(ctx, "Authorization failed: missing role", extra);

            ctx.set_response(Response::json_value(
                StatusCode::FORBIDDEN,
                json!({ "error": "Forbidden" }),
            ));
            return Ok(InboundAction::Stop);
        }

        let missing = self.access.permissions_missing(&access, &rule.permissions);
        if !missing.is_empty() {
            let mut extra = Map::new();
            extra.insert("required_permissions".to_string(), json!(rule.permissions));
            extra.insert("missing_permissions".to_string(), json!(missing));
            self.deny(ctx, "Authorization failed: missing permission", extra);

            ctx.set_response(Response::json_value(
                StatusCode::FORBIDDEN,
                json!({ "error": "Unauthorized" }),
            ));
            return Ok(InboundAction::Stop);
        }

        Ok(InboundAction::Continue)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Grants, Principal, RoleHierarchy, RoleProvider, StaticRoleProvider};
    use crate::http::Request;
    use crate::logging::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stage(sink: Arc<MemorySink>) -> Authorization {
        let hierarchy = RoleHierarchy::builder()
            .role("viewer", &[] as &[&str], &["reports.view"])
            .role("manager", &["viewer"], &["reports.export"])
            .build()
            .unwrap();
        let provider = StaticRoleProvider::new().assign("9", &["manager"], &[]);
        let access = AccessControl::new(hierarchy, Arc::new(provider));

        Authorization::new(Arc::new(access))
            .rule("/admin", &["manager"], &[])
            .rule("/admin/reports/*", &[], &["reports.view", "reports.export"])
            .with_logger(Logger::new(sink))
    }

    async fn run(stage: &Authorization, request: Request) -> (InboundAction, Option<Response>) {
        let mut ctx = Context::new(request);
        let action = stage.process_request(&mut ctx).await.unwrap();
        (action, ctx.take_response())
    }

    fn body(response: &Response) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let stage = stage(Arc::new(MemorySink::new()));

        assert_eq!(stage.rule_for("/admin/users").unwrap().path, "/admin");
        assert_eq!(stage.rule_for("/admin/reports/q3").unwrap().path, "/admin/reports/*");
        assert!(stage.rule_for("/administrator").is_none());
        assert!(stage.rule_for("/public").is_none());
    }

    #[tokio::test]
    async fn test_disguised_protected_paths_still_match() {
        let stage = stage(Arc::new(MemorySink::new()));

        for uri in [
            "/%61dmin/users",
            "//admin/users",
            "/admin//users",
            "/public/../admin/users",
            "/ADMIN/users",
        ] {
            let (action, response) = run(&stage, Request::new("GET", uri)).await;
            assert_eq!(action, InboundAction::Stop, "{}", uri);
            assert_eq!(response.unwrap().status.as_u16(), 401, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_unprotected_paths_pass_without_principal() {
        let stage = stage(Arc::new(MemorySink::new()));
        let (action, _) = run(&stage, Request::new("GET", "/public")).await;
        assert_eq!(action, InboundAction::Continue);
    }

    #[tokio::test]
    async fn test_missing_principal_is_401() {
        let stage = stage(Arc::new(MemorySink::new()));
        let (action, response) = run(&stage, Request::new("GET", "/admin")).await;

        assert_eq!(action, InboundAction::Stop);
        assert_eq!(response.unwrap().status.as_u16(), 401);
    }

    #[tokio::test]
    async fn test_role_failure_is_forbidden() {
        let sink = Arc::new(MemorySink::new());
        let stage = stage(sink.clone());
        let request = Request::new("GET", "/admin/users")
            .with_principal(Principal::new("5").with_role("viewer"));

        let (action, response) = run(&stage, request).await;
        let response = response.unwrap();

        assert_eq!(action, InboundAction::Stop);
        assert_eq!(response.status.as_u16(), 403);
        assert_eq!(body(&response), json!({"error": "Forbidden"}));

        let warning = sink.find("missing role").unwrap();
        assert_eq!(warning.context["principal_id"], "5");
        assert_eq!(warning.context["required_roles"], json!(["manager"]));
    }

    #[tokio::test]
    async fn test_missing_one_permission_is_unauthorized() {
        let stage = stage(Arc::new(MemorySink::new()));
        let request = Request::new("GET", "/admin/reports/q3")
            .with_principal(Principal::new("6").with_role("viewer"));

        let (_, response) = run(&stage, request).await;
        let response = response.unwrap();
        assert_eq!(response.status.as_u16(), 403);
        assert_eq!(body(&response), json!({"error": "Unauthorized"}));
    }

    /// Counts lookups against the backing store
    struct CountingProvider {
        inner: StaticRoleProvider,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RoleProvider for CountingProvider {
        async fn grants(&self, principal: &Principal) -> Result<Grants> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.grants(principal).await
        }
    }

    #[tokio::test]
    async fn test_access_is_resolved_once_per_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hierarchy = RoleHierarchy::builder()
            .role("manager", &[] as &[&str], &["reports.export"])
            .build()
            .unwrap();
        let provider = CountingProvider {
            inner: StaticRoleProvider::new().assign("9", &["manager"], &[]),
            calls: calls.clone(),
        };
        let stage = Authorization::new(Arc::new(AccessControl::new(hierarchy, Arc::new(provider))))
            .rule("/reports", &["manager"], &["reports.export"]);

        let request = Request::new("GET", "/reports/q3").with_principal(Principal::new("9"));
        assert_eq!(run(&stage, request).await.0, InboundAction::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let public = Request::new("GET", "/public").with_principal(Principal::new("9"));
        run(&stage, public).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_assignments_and_super_admin_pass() {
        let stage = stage(Arc::new(MemorySink::new()));

        let assigned = Request::new("GET", "/admin/reports/q3").with_principal(Principal::new("9"));
        assert_eq!(run(&stage, assigned).await.0, InboundAction::Continue);

        let root = Request::new("GET", "/admin/reports/q3")
            .with_principal(Principal::new("1").with_role("super_admin"));
        assert_eq!(run(&stage, root).await.0, InboundAction::Continue);
    }
}
