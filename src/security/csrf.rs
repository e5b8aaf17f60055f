use crate::clock::{Clock, SystemClock};
use crate::security::constant_time_compare;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN_LENGTH: usize = 40;

/// Lifetime of an unused token
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone)]
struct IssuedToken {
    value: String,
    expires_at: u64,
}

impl IssuedToken {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Issues and checks per-session CSRF tokens
///
/// One active token per session. Generating a new token replaces the old
/// one, which from then on fails validation. Tokens expire `ttl` after
/// they were last issued or published, and expired entries are purged.
pub struct CsrfTokenManager {
    tokens: DashMap<String, IssuedToken>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CsrfTokenManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl: DEFAULT_TOKEN_TTL,
            clock,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn expiry(&self, now: u64) -> u64 {
        now + self.ttl.as_secs().max(1)
    }

    // Occasionally clean up expired tokens (1% chance); never call under an entry lock
    fn maybe_purge(&self) {
        if rand::random::<f32>() < 0.01 {
            self.purge_expired();
        }
    }

    /// Generate a new token for `session_id`, overwriting any prior value
    pub fn generate_token(&self, session_id: &str) -> String {
        self.maybe_purge();

        let token = random_token();
        let expires_at = self.expiry(self.clock.unix_secs());
        self.tokens.insert(
            session_id.to_string(),
            IssuedToken {
                value: token.clone(),
                expires_at,
            },
        );
        token
    }

    pub fn token(&self, session_id: &str) -> Option<String> {
        let now = self.clock.unix_secs();
        self.tokens
            .get(session_id)
            .filter(|issued| !issued.is_expired(now))
            .map(|issued| issued.value.clone())
    }

    /// Current token for the session, issuing one if it has none
    ///
    /// Runs under the session's entry lock, so concurrent first requests
    /// for one session all receive the same token. Each call extends the
    /// token's lifetime.
    pub fn token_or_generate(&self, session_id: &str) -> String {
        self.maybe_purge();

        let now = self.clock.unix_secs();
        let expires_at = self.expiry(now);
        let mut issued = self
            .tokens
            .entry(session_id.to_string())
            .or_insert_with(|| IssuedToken {
                value: random_token(),
                expires_at,
            });

        if issued.is_expired(now) {
            issued.value = random_token();
        }
        issued.expires_at = expires_at;
        issued.value.clone()
    }

    pub fn validate(&self, session_id: &str, candidate: &str) -> bool {
        let now = self.clock.unix_secs();
        match self.tokens.get(session_id) {
            Some(issued) if !issued.is_expired(now) => {
                constant_time_compare(&issued.value, candidate)
            }
            _ => false,
        }
    }

    pub fn forget(&self, session_id: &str) {
        self.tokens.remove(session_id);
    }

    /// Drop expired tokens, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.unix_secs();
        let before = self.tokens.len();
        self.tokens.retain(|_, issued| !issued.is_expired(now));
        before.saturating_sub(self.tokens.len())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for CsrfTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CsrfTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfTokenManager")
            .field("tokens", &self.tokens.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn random_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
