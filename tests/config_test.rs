//! Building the standard pipeline from a configuration file

use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use warden::auth::{BearerTokenGuard, Principal, StaticRoleProvider, StaticTokenResolver};
use warden::config::WardenConfig;
use warden::configuration::{ConfigProvider, MapProvider, TomlProvider};
use warden::error::{Error, Result};
use warden::http::{Request, Response};
use warden::middleware::{FnHandler, Pipeline};
use warden::Services;

const CONFIG: &str = r#"
[rate_limit]
max_attempts = 2
identifier = "user"

[csrf]
enabled = false

[auth]
guards = ["bearer"]

[authorization]
provider = "database"

[authorization.roles.editor]
permissions = ["posts.edit"]

[[authorization.rules]]
path = "/posts/*"
permissions = ["posts.edit"]

[compression]
enabled = false

[cache]
ttl_secs = 120
"#;

fn handler() -> FnHandler<fn(&Request) -> Result<Response>> {
    fn ok(req: &Request) -> Result<Response> {
        Ok(Response::json(json!({ "path": req.path })))
    }
    FnHandler(ok as fn(&Request) -> Result<Response>)
}

fn services() -> Services {
    let resolver = StaticTokenResolver::new()
        .with_token("alice", Principal::new("1"))
        .with_token("bob", Principal::new("2"));
    // stands in for a database-backed provider
    let roles = StaticRoleProvider::new().assign("1", &["editor"], &[]);

    Services::default()
        .with_guard(BearerTokenGuard::new(Arc::new(resolver)))
        .with_role_provider(Arc::new(roles))
}

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

fn as_user(token: &str, uri: &str) -> Request {
    Request::new("GET", uri)
        .with_header("Accept", "application/json")
        .with_header("Authorization", &format!("Bearer {}", token))
}

#[tokio::test]
async fn test_file_config_drives_the_chain() {
    let file = write_config();
    let config = WardenConfig::from_file(file.path()).unwrap();
    let pipeline = Pipeline::standard(&config, services(), handler()).unwrap();

    let names = pipeline.stage_names();
    assert!(!names.contains(&"csrf"));
    assert!(!names.contains(&"compression"));
    assert_eq!(names.first(), Some(&"logging"));
    assert_eq!(names.last(), Some(&"timing"));

    let allowed = pipeline.handle(as_user("alice", "/posts/7")).await;
    assert_eq!(allowed.status.as_u16(), 200);
    assert_eq!(allowed.header("Cache-Control"), Some("public, max-age=120"));

    let denied = pipeline.handle(as_user("bob", "/posts/7")).await;
    assert_eq!(denied.status.as_u16(), 403);
}

#[tokio::test]
async fn test_rate_limit_falls_back_to_ip_before_authentication() {
    let config = WardenConfig::from_file(write_config().path()).unwrap();
    let pipeline = Pipeline::standard(&config, services(), handler()).unwrap();

    // the limiter runs before the guards, so both users share the client IP bucket
    assert_eq!(pipeline.handle(as_user("alice", "/home")).await.status.as_u16(), 200);
    assert_eq!(pipeline.handle(as_user("bob", "/home")).await.status.as_u16(), 200);
    assert_eq!(pipeline.handle(as_user("alice", "/home")).await.status.as_u16(), 429);
}

#[test]
fn test_overrides_win_over_the_file() {
    let mut config = WardenConfig::from_file(write_config().path()).unwrap();
    let overrides = MapProvider::new()
        .with("rate_limit.max_attempts", "10")
        .with("cache.enabled", "false")
        .with("auth.guards", "bearer,session");

    config.apply_overrides(&overrides).unwrap();

    assert_eq!(config.rate_limit.max_attempts, 10);
    assert!(!config.cache.enabled);
    assert_eq!(config.auth.guards, vec!["bearer", "session"]);
    // untouched keys keep their file values
    assert_eq!(config.cache.ttl_secs, 120);
}

#[test]
fn test_toml_provider_reads_dot_paths() {
    let provider = TomlProvider::from_str(CONFIG).unwrap();

    assert_eq!(provider.get("rate_limit.max_attempts").as_deref(), Some("2"));
    assert_eq!(provider.get_bool("csrf.enabled"), Some(false));
    assert!(provider.get("rate_limit.missing").is_none());
}

#[test]
fn test_database_provider_without_a_store_fails_at_startup() {
    let config = WardenConfig::from_file(write_config().path()).unwrap();
    let services = Services::default().with_guard(BearerTokenGuard::new(Arc::new(
        StaticTokenResolver::new(),
    )));

    let err = Pipeline::standard(&config, services, handler()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = WardenConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("absent.toml"));
}
