use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use warden::prelude::*;

/// Small JSON API to exercise the standard pipeline
struct DemoApi;

#[async_trait]
impl Handler for DemoApi {
    async fn handle(&self, req: &Request) -> Result<Response> {
        let response = match (req.method.as_str(), req.path.as_str()) {
            ("GET", "/health") => Response::json(json!({ "status": "ok" })),
            ("GET", "/") => Response::html("<h1>warden</h1><p>Pipeline is running.</p>"),
            ("GET", "/api/me") => Response::json(json!({
                "id": req.principal.as_ref().map(|p| p.id.clone()),
                "roles": req.principal.as_ref().map(|p| p.roles.clone()),
            })),
            ("POST", "/api/echo") => Response::json(req.all_input()),
            _ => Response::not_found(),
        };
        Ok(response)
    }
}

#[tokio::main]
async fn main() -> warden::Result<()> {
    let config = if Path::new("warden.toml").exists() {
        WardenConfig::load("warden.toml")?
    } else {
        WardenConfig::from_env()?
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    let mut resolver = StaticTokenResolver::new();
    if let Ok(token) = std::env::var("WARDEN_DEMO_TOKEN") {
        resolver = resolver.with_token(
            &token,
            Principal::new("demo").with_roles(&["admin"]),
        );
        log::info!("Demo bearer token enabled for principal 'demo'");
    }

    let services = Services::default()
        .with_guard(BearerTokenGuard::new(Arc::new(resolver)))
        .with_guard(SessionGuard::new(config.csrf.session_cookie.clone()));

    let pipeline = Pipeline::standard(&config, services, DemoApi)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    Server::new(Arc::new(pipeline))
        .max_body_bytes(config.server.max_body_bytes)
        .serve(&addr)
        .await
}
