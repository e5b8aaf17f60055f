//! End-to-end behaviour of the standard stage chain

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use warden::auth::{BearerTokenGuard, Principal, SessionGuard, StaticTokenResolver};
use warden::cache::MemoryRateLimitStore;
use warden::clock::ManualClock;
use warden::config::{AccessRule, RoleDefinition, WardenConfig};
use warden::error::{Error, Result};
use warden::http::{Request, Response};
use warden::logging::{Logger, MemorySink};
use warden::middleware::{Handler, Pipeline};
use warden::Services;

struct App;

#[async_trait]
impl Handler for App {
    async fn handle(&self, req: &Request) -> Result<Response> {
        match (req.method.as_str(), req.path.as_str()) {
            ("GET", "/health") => Ok(Response::json(json!({ "status": "ok" }))),
            ("GET", "/api/items") => {
                let items: Vec<Value> = (0..100)
                    .map(|id| json!({ "id": id, "name": format!("item {}", id) }))
                    .collect();
                Ok(Response::json(json!({ "items": items })))
            }
            ("GET", "/api/report") => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Response::json(json!({ "report": "q3" })))
            }
            ("GET", "/api/fail") => Err(Error::internal("database unavailable")),
            ("POST", "/api/echo") => Ok(Response::json(req.all_input())),
            ("GET", "/profile") => Ok(Response::html("<form></form>")),
            ("POST", "/profile") => Ok(Response::json(json!({ "saved": true }))),
            (_, path) if path.starts_with("/admin") => Ok(Response::json(json!({ "admin": path }))),
            _ => Ok(Response::not_found()),
        }
    }
}

fn role(inherits: &[&str], permissions: &[&str]) -> RoleDefinition {
    RoleDefinition {
        inherits: inherits.iter().map(|r| r.to_string()).collect(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

fn config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.csrf.excluded_paths = vec!["/api/*".to_string()];

    let authz = &mut config.authorization;
    authz.roles.insert("viewer".to_string(), role(&[], &["reports.view"]));
    authz
        .roles
        .insert("manager".to_string(), role(&["viewer"], &["reports.export"]));
    authz.roles.insert("admin".to_string(), role(&["manager"], &[]));
    authz.rules = vec![
        AccessRule {
            path: "/admin".to_string(),
            roles: vec!["admin".to_string()],
            permissions: Vec::new(),
        },
        AccessRule {
            path: "/admin/reports".to_string(),
            roles: Vec::new(),
            permissions: vec!["reports.view".to_string(), "reports.export".to_string()],
        },
    ];
    config
}

struct Harness {
    pipeline: Pipeline,
    sink: Arc<MemorySink>,
}

fn harness_with(config: WardenConfig, services: Services) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let resolver = StaticTokenResolver::new()
        .with_token("t-user", Principal::new("u1"))
        .with_token("t-viewer", Principal::new("u2").with_role("viewer"))
        .with_token("t-manager", Principal::new("u3").with_role("manager"))
        .with_token("t-root", Principal::new("u0").with_role("super_admin"));

    let mut services = services.with_guard(BearerTokenGuard::new(Arc::new(resolver)));
    services.logger = Logger::new(sink.clone());
    if !services.guards.iter().any(|guard| guard.name() == "session") {
        services = services.with_guard(SessionGuard::new("warden_session"));
    }

    let pipeline = Pipeline::standard(&config, services, App).unwrap();
    Harness { pipeline, sink }
}

fn harness() -> Harness {
    harness_with(config(), Services::default())
}

fn api(method: &str, uri: &str, token: &str) -> Request {
    Request::new(method, uri)
        .with_header("Accept", "application/json")
        .with_header("Authorization", &format!("Bearer {}", token))
}

fn body(response: &Response) -> Value {
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn test_json_response_is_decorated_compressed_and_cached() {
    let h = harness();
    let request = || api("GET", "/api/items", "t-user").with_header("Accept-Encoding", "gzip");

    let first = h.pipeline.handle(request()).await;
    assert_eq!(first.status.as_u16(), 200);
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(first.header("Content-Encoding"), Some("gzip"));
    assert_eq!(first.header("Vary"), Some("Accept-Encoding"));
    assert_eq!(first.header("Cache-Control"), Some("public, max-age=3600"));
    assert_eq!(first.header("X-Frame-Options"), Some("DENY"));
    assert_eq!(first.header("X-RateLimit-Limit"), Some("60"));
    assert!(first.has_header("X-Response-Time"));

    let mut decoded = String::new();
    GzDecoder::new(first.body.as_slice())
        .read_to_string(&mut decoded)
        .unwrap();
    let items: Value = serde_json::from_str(&decoded).unwrap();
    assert_eq!(items["items"].as_array().unwrap().len(), 100);

    let second = h.pipeline.handle(request()).await;
    assert_eq!(second.header("X-Cache"), Some("HIT"));
    assert_eq!(second.body, first.body);
    assert_eq!(second.header("X-RateLimit-Remaining"), Some("58"));

    assert!(h.sink.find("Request started").is_some());
    assert!(h.sink.find("Request completed").is_some());
}

fn response_ms(response: &Response) -> f64 {
    let timings: Vec<&str> = response
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("X-Response-Time"))
        .map(|(_, value)| value.as_str())
        .collect();
    assert_eq!(timings.len(), 1, "{:?}", timings);
    timings[0].trim_end_matches(" ms").parse().unwrap()
}

#[tokio::test]
async fn test_cache_hits_report_their_own_response_time() {
    let h = harness();

    let miss = h.pipeline.handle(api("GET", "/api/report", "t-user")).await;
    assert_eq!(miss.header("X-Cache"), Some("MISS"));
    assert!(response_ms(&miss) >= 50.0);

    let hit = h.pipeline.handle(api("GET", "/api/report", "t-user")).await;
    assert_eq!(hit.header("X-Cache"), Some("HIT"));
    assert!(response_ms(&hit) < 50.0);
}

#[tokio::test]
async fn test_encoded_and_doubled_paths_cannot_skip_rules() {
    let h = harness();

    for uri in ["/%61dmin/users", "//admin/users", "/Admin/users"] {
        let response = h.pipeline.handle(api("GET", uri, "t-user")).await;
        assert_eq!(response.status.as_u16(), 403, "{}", uri);

        let anonymous = h
            .pipeline
            .handle(Request::new("GET", uri).with_header("Accept", "application/json"))
            .await;
        assert_eq!(anonymous.status.as_u16(), 401, "{}", uri);
    }
}

#[tokio::test]
async fn test_identity_clients_get_a_separate_cache_entry() {
    let h = harness();

    let gzip = h
        .pipeline
        .handle(api("GET", "/api/items", "t-user").with_header("Accept-Encoding", "gzip"))
        .await;
    let identity = h.pipeline.handle(api("GET", "/api/items", "t-user")).await;

    assert_eq!(identity.header("X-Cache"), Some("MISS"));
    assert!(!identity.has_header("Content-Encoding"));
    assert_ne!(identity.body, gzip.body);
    assert_eq!(body(&identity)["items"][3]["id"], 3);
}

#[tokio::test]
async fn test_unauthenticated_requests() {
    let h = harness();

    let api_client = h
        .pipeline
        .handle(Request::new("GET", "/api/items").with_header("Accept", "application/json"))
        .await;
    assert_eq!(api_client.status.as_u16(), 401);
    assert_eq!(body(&api_client), json!({ "message": "Unauthenticated." }));

    let browser = h
        .pipeline
        .handle(Request::new("GET", "/profile").with_header("Accept", "text/html"))
        .await;
    assert_eq!(browser.status.as_u16(), 302);
    assert_eq!(browser.header("Location"), Some("/login"));

    let health = h.pipeline.handle(Request::new("GET", "/health")).await;
    assert_eq!(health.status.as_u16(), 200);
}

#[tokio::test]
async fn test_rate_limit_window() {
    let mut config = config();
    config.rate_limit.max_attempts = 3;
    config.rate_limit.decay_minutes = 1;
    config.rate_limit.excluded_paths = vec!["/health".to_string()];

    let clock = Arc::new(ManualClock::at_unix(50_000));
    let store = Arc::new(MemoryRateLimitStore::with_clock(clock.clone()));
    let h = harness_with(config, Services::default().with_rate_limits(store));

    for _ in 0..3 {
        let response = h.pipeline.handle(api("GET", "/api/items", "t-user")).await;
        assert_eq!(response.status.as_u16(), 200);
    }

    let limited = h.pipeline.handle(api("GET", "/api/items", "t-user")).await;
    assert_eq!(limited.status.as_u16(), 429);
    assert_eq!(limited.header("Retry-After"), Some("60"));
    assert_eq!(body(&limited)["retry_after"], 60);
    assert!(h.sink.find("Rate limit exceeded").is_some());

    for _ in 0..5 {
        let health = h.pipeline.handle(Request::new("GET", "/health")).await;
        assert_eq!(health.status.as_u16(), 200);
    }

    clock.advance(Duration::from_secs(60));
    let after = h.pipeline.handle(api("GET", "/api/items", "t-user")).await;
    assert_eq!(after.status.as_u16(), 200);
}

#[tokio::test]
async fn test_csrf_round_trip_for_session_users() {
    let sessions = Arc::new(SessionGuard::new("warden_session"));
    sessions.login("s-1", Principal::new("u5"));
    let mut services = Services::default();
    services.guards.push(sessions.clone());
    let h = harness_with(config(), services);

    let cookie = "warden_session=s-1";
    let form = h
        .pipeline
        .handle(
            Request::new("GET", "/profile")
                .with_header("Accept", "text/html")
                .with_header("Cookie", cookie),
        )
        .await;
    assert_eq!(form.status.as_u16(), 200);
    let token = form.header("X-CSRF-TOKEN").unwrap().to_string();
    assert_eq!(token.len(), 40);
    assert!(form.header("Set-Cookie").unwrap().starts_with("XSRF-TOKEN="));

    let missing = h
        .pipeline
        .handle(Request::new("POST", "/profile").with_header("Cookie", cookie))
        .await;
    assert_eq!(missing.status.as_u16(), 419);
    assert_eq!(body(&missing), json!({ "message": "CSRF token mismatch." }));

    let forged = h
        .pipeline
        .handle(
            Request::new("POST", "/profile")
                .with_header("Cookie", cookie)
                .with_header("X-CSRF-TOKEN", "0000000000000000000000000000000000000000"),
        )
        .await;
    assert_eq!(forged.status.as_u16(), 419);

    let accepted = h
        .pipeline
        .handle(
            Request::new("POST", "/profile")
                .with_header("Cookie", cookie)
                .with_body_param("_token", token.as_str())
                .with_body_param("name", "Ada"),
        )
        .await;
    assert_eq!(accepted.status.as_u16(), 200);
    assert_eq!(body(&accepted), json!({ "saved": true }));
}

#[tokio::test]
async fn test_sql_injection_is_rejected_in_every_input() {
    let h = harness();

    let requests = [
        api("GET", "/api/items?q=%27%20OR%201%3D1", "t-user"),
        api("POST", "/api/echo", "t-user").with_body_param("username", "admin' --"),
        api("POST", "/api/echo", "t-user").with_json(json!({
            "filter": { "names": ["ada", "1 UNION SELECT password FROM users"] }
        })),
    ];

    for request in requests {
        let response = h.pipeline.handle(request).await;
        assert_eq!(response.status.as_u16(), 400);
        assert_eq!(
            body(&response),
            json!({ "error": "Bad Request", "message": "Request blocked due to SQL patterns." })
        );
    }

    let benign = h
        .pipeline
        .handle(
            api("POST", "/api/echo", "t-user")
                .with_json(json!({ "email": "ada@example.com", "name": "Ada99" })),
        )
        .await;
    assert_eq!(benign.status.as_u16(), 200);
    assert_eq!(body(&benign), json!({ "email": "ada@example.com", "name": "Ada99" }));
}

#[tokio::test]
async fn test_script_input_reaches_handler_encoded() {
    let h = harness();

    let response = h
        .pipeline
        .handle(api("POST", "/api/echo", "t-user").with_json(json!({
            "comment": "<script>alert(1)</script>",
            "stars": 5,
            "verified": true,
        })))
        .await;

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(
        body(&response),
        json!({
            "comment": "&lt;script&gt;alert(1)&lt;/script&gt;",
            "stars": 5,
            "verified": true,
        })
    );
    assert_eq!(response.header("X-XSS-Protection"), Some("1; mode=block"));
    assert!(h.sink.find("XSS attempt neutralized").is_some());
}

#[tokio::test]
async fn test_role_and_permission_rules() {
    let h = harness();
    let status = |response: Response| response.status.as_u16();

    // /admin needs the admin role
    assert_eq!(status(h.pipeline.handle(api("GET", "/admin/users", "t-user")).await), 403);
    assert_eq!(status(h.pipeline.handle(api("GET", "/admin/users", "t-root")).await), 200);

    // /admin/reports needs both permissions, whatever the role
    let viewer = h.pipeline.handle(api("GET", "/admin/reports", "t-viewer")).await;
    assert_eq!(viewer.status.as_u16(), 403);
    assert_eq!(body(&viewer), json!({ "error": "Unauthorized" }));
    assert_eq!(status(h.pipeline.handle(api("GET", "/admin/reports", "t-manager")).await), 200);
    assert_eq!(status(h.pipeline.handle(api("GET", "/admin/reports", "t-root")).await), 200);

    let warning = h.sink.find("missing permission").unwrap();
    assert_eq!(warning.context["missing_permissions"], json!(["reports.export"]));
}

#[tokio::test]
async fn test_handler_failure_is_a_generic_500() {
    let h = harness();

    let response = h.pipeline.handle(api("GET", "/api/fail", "t-user")).await;
    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(body(&response), json!({ "message": "Server Error" }));
    assert!(!response.has_header("X-Cache"));
    assert!(response.has_header("X-Content-Type-Options"));

    let fault = h.sink.find("Pipeline stage failed").unwrap();
    assert_eq!(fault.context["stage"], "handler");
}

#[tokio::test]
async fn test_log_entries_never_carry_secrets() {
    let h = harness();

    h.pipeline
        .handle(api("POST", "/api/echo", "t-user").with_json(json!({
            "email": "ada@example.com",
            "password": "hunter2",
            "profile": { "api_key": "sk-live-123" },
        })))
        .await;

    for entry in h.sink.entries() {
        let rendered = serde_json::to_string(&entry.context).unwrap();
        assert!(!rendered.contains("hunter2"), "leaked in {}", entry.message);
        assert!(!rendered.contains("sk-live-123"), "leaked in {}", entry.message);
    }
}
