//! Sources of a principal's roles and direct permissions
//!
//! The static provider reads what authentication bound to the principal,
//! optionally merged with assignments from configuration. A persistent
//! store plugs in by implementing [`RoleProvider`]; [`CachedRoleProvider`]
//! memoises any provider for a fixed TTL.

use crate::auth::Principal;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Roles and direct permissions assigned to a principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants {
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

impl Grants {
    pub fn of(principal: &Principal) -> Self {
        Self {
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        }
    }

    pub fn merge(&mut self, other: &Grants) {
        self.roles.extend(other.roles.iter().cloned());
        self.permissions.extend(other.permissions.iter().cloned());
    }
}

#[async_trait]
pub trait RoleProvider: Send + Sync + 'static {
    async fn grants(&self, principal: &Principal) -> Result<Grants>;

    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// Grants carried on the principal plus fixed per-id assignments
#[derive(Debug, Default)]
pub struct StaticRoleProvider {
    assignments: HashMap<String, Grants>,
}

impl StaticRoleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, principal_id: &str, roles: &[&str], permissions: &[&str]) -> Self {
        let grants = self.assignments.entry(principal_id.to_string()).or_default();
        grants.roles.extend(roles.iter().map(|r| r.to_string()));
        grants
            .permissions
            .extend(permissions.iter().map(|p| p.to_string()));
        self
    }
}

#[async_trait]
impl RoleProvider for StaticRoleProvider {
    async fn grants(&self, principal: &Principal) -> Result<Grants> {
        let mut grants = Grants::of(principal);
        if let Some(assigned) = self.assignments.get(&principal.id) {
            grants.merge(assigned);
        }
        Ok(grants)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

struct CachedGrants {
    grants: Grants,
    expires_at: SystemTime,
}

/// Memoises another provider's answers per principal id
pub struct CachedRoleProvider {
    inner: Arc<dyn RoleProvider>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, CachedGrants>,
}

impl CachedRoleProvider {
    pub fn new(inner: Arc<dyn RoleProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            clock: Arc::new(SystemClock),
            entries: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Drop the cached entry for one principal
    pub fn invalidate(&self, principal_id: &str) {
        self.entries.remove(principal_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RoleProvider for CachedRoleProvider {
    async fn grants(&self, principal: &Principal) -> Result<Grants> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(&principal.id) {
            if entry.expires_at > now {
                return Ok(entry.grants.clone());
            }
        }

        // never hold a map guard across the await
        let grants = self.inner.grants(principal).await?;
        self.entries.insert(
            principal.id.clone(),
            CachedGrants {
                grants: grants.clone(),
                expires_at: now + self.ttl,
            },
        );
        log::debug!(
            "Cached grants for principal '{}' from {} provider",
            principal.id,
            self.inner.name()
        );
        Ok(grants)
    }

    fn name(&self) -> &'static str {
        "cache"
    }
}
