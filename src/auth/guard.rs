use crate::auth::Principal;
use crate::error::Result;
use crate::http::Request;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// One way of recognising the caller
///
/// `Ok(None)` means "not authenticated by this guard"; errors are reserved
/// for lookups that failed.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn authenticate(&self, req: &Request) -> Result<Option<Principal>>;
}

/// Maps an opaque API token to a principal
#[async_trait]
pub trait TokenResolver: Send + Sync + 'static {
    async fn resolve(&self, token: &str) -> Result<Option<Principal>>;
}

/// Fixed token table
#[derive(Debug, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, principal: Principal) -> Self {
        self.tokens.insert(token.to_string(), principal);
        self
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Principal>> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// `Authorization: Bearer <token>` guard
pub struct BearerTokenGuard {
    resolver: Arc<dyn TokenResolver>,
}

impl BearerTokenGuard {
    pub fn new(resolver: Arc<dyn TokenResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Guard for BearerTokenGuard {
    fn name(&self) -> &str {
        "bearer"
    }

    async fn authenticate(&self, req: &Request) -> Result<Option<Principal>> {
        match req.bearer_token() {
            Some(token) => self.resolver.resolve(token).await,
            None => Ok(None),
        }
    }
}

/// Session-backed guard: a session id logged in to a principal
pub struct SessionGuard {
    cookie_name: String,
    sessions: DashMap<String, Principal>,
}

impl SessionGuard {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            sessions: DashMap::new(),
        }
    }

    pub fn login(&self, session_id: &str, principal: Principal) {
        self.sessions.insert(session_id.to_string(), principal);
    }

    pub fn logout(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

#[async_trait]
impl Guard for SessionGuard {
    fn name(&self) -> &str {
        "session"
    }

    async fn authenticate(&self, req: &Request) -> Result<Option<Principal>> {
        Ok(req
            .session(&self.cookie_name)
            .and_then(|id| self.sessions.get(&id).map(|entry| entry.value().clone())))
    }
}
