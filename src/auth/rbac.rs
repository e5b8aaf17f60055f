//! Role hierarchy and access evaluation
//!
//! Roles form a directed acyclic graph through `inherits`: a role inherits
//! every role it lists and, transitively, everything those roles inherit.
//! A principal's permissions are the union of its direct grants and the
//! permissions of every role it effectively holds. Direct grants are kept
//! apart so audits can tell the two sources apart.

use crate::auth::provider::RoleProvider;
use crate::auth::Principal;
use crate::config::RoleDefinition;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub const SUPER_ADMIN: &str = "super_admin";

#[derive(Debug, Clone, Default)]
struct RoleNode {
    inherits: Vec<String>,
    permissions: BTreeSet<String>,
}

/// Validated role graph
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    roles: HashMap<String, RoleNode>,
}

impl RoleHierarchy {
    pub fn builder() -> RoleHierarchyBuilder {
        RoleHierarchyBuilder::default()
    }

    pub fn from_definitions(definitions: &HashMap<String, RoleDefinition>) -> Result<Self> {
        let mut builder = Self::builder();
        for (name, definition) in definitions {
            builder = builder.role(name, &definition.inherits, &definition.permissions);
        }
        builder.build()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Every role reachable from `held`, including the held roles themselves
    ///
    /// Roles unknown to the hierarchy are kept as plain leaf roles.
    pub fn expand<'a, I>(&self, held: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = held.into_iter().cloned().collect();

        while let Some(role) = stack.pop() {
            if !seen.insert(role.clone()) {
                continue;
            }
            if let Some(node) = self.roles.get(&role) {
                stack.extend(node.inherits.iter().cloned());
            }
        }

        seen
    }

    /// Permissions attached to the role itself, without inheritance
    pub fn role_permissions(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.roles.get(role).map(|node| &node.permissions)
    }
}

#[derive(Debug, Default)]
pub struct RoleHierarchyBuilder {
    roles: HashMap<String, RoleNode>,
}

impl RoleHierarchyBuilder {
    pub fn role<S: AsRef<str>>(mut self, name: &str, inherits: &[S], permissions: &[S]) -> Self {
        let node = self.roles.entry(name.to_string()).or_default();
        node.inherits
            .extend(inherits.iter().map(|r| r.as_ref().to_string()));
        node.permissions
            .extend(permissions.iter().map(|p| p.as_ref().to_string()));
        self
    }

    /// Validate the graph: every parent must exist and there must be no cycle
    pub fn build(self) -> Result<RoleHierarchy> {
        check_acyclic(&self.roles)?;
        Ok(RoleHierarchy { roles: self.roles })
    }
}

fn check_acyclic(roles: &HashMap<String, RoleNode>) -> Result<()> {
    for (name, node) in roles {
        if let Some(missing) = node.inherits.iter().find(|p| !roles.contains_key(*p)) {
            return Err(Error::config(format!(
                "Role '{}' inherits unknown role '{}'",
                name, missing
            )));
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut names: Vec<&str> = roles.keys().map(|n| n.as_str()).collect();
    names.sort_unstable();

    for start in names {
        if marks.contains_key(start) {
            continue;
        }
        // iterative DFS; each frame is (role, index of next parent to visit)
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::Visiting);

        while let Some((role, next)) = stack.pop() {
            let parents = &roles[role].inherits;
            if next < parents.len() {
                stack.push((role, next + 1));
                let parent = parents[next].as_str();
                match marks.get(parent) {
                    Some(Mark::Visiting) => {
                        return Err(Error::config(format!(
                            "Role hierarchy contains a cycle through '{}' and '{}'",
                            role, parent
                        )));
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(parent, Mark::Visiting);
                        stack.push((parent, 0));
                    }
                }
            } else {
                marks.insert(role, Mark::Done);
            }
        }
    }

    Ok(())
}

/// Where an effective permission comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantSource {
    Direct,
    Role(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionGrant {
    pub permission: String,
    pub source: GrantSource,
}

/// Resolved roles and permissions of one principal
#[derive(Debug, Clone, Default)]
pub struct EffectiveAccess {
    pub roles: BTreeSet<String>,
    pub direct_permissions: BTreeSet<String>,
    /// Permission -> first role (alphabetically) that implies it
    pub role_permissions: BTreeMap<String, String>,
}

impl EffectiveAccess {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.direct_permissions.contains(permission)
            || self.role_permissions.contains_key(permission)
    }
}

/// Evaluates role and permission requirements against a principal
pub struct AccessControl {
    hierarchy: RoleHierarchy,
    provider: Arc<dyn RoleProvider>,
    super_admin: String,
}

impl AccessControl {
    pub fn new(hierarchy: RoleHierarchy, provider: Arc<dyn RoleProvider>) -> Self {
        Self {
            hierarchy,
            provider,
            super_admin: SUPER_ADMIN.to_string(),
        }
    }

    pub fn with_super_admin(mut self, role: impl Into<String>) -> Self {
        self.super_admin = role.into();
        self
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    pub async fn effective(&self, principal: &Principal) -> Result<EffectiveAccess> {
        let grants = self.provider.grants(principal).await?;
        let roles = self.hierarchy.expand(grants.roles.iter());

        let mut role_permissions = BTreeMap::new();
        for role in &roles {
            if let Some(permissions) = self.hierarchy.role_permissions(role) {
                for permission in permissions {
                    role_permissions
                        .entry(permission.clone())
                        .or_insert_with(|| role.clone());
                }
            }
        }

        Ok(EffectiveAccess {
            roles,
            direct_permissions: grants.permissions,
            role_permissions,
        })
    }

    pub fn is_super_admin(&self, access: &EffectiveAccess) -> bool {
        access.has_role(&self.super_admin)
    }

    /// Holds any of `required` (directly or inherited), or is super admin
    pub async fn check_roles(&self, principal: &Principal, required: &[String]) -> Result<bool> {
        if required.is_empty() {
            return Ok(true);
        }
        let access = self.effective(principal).await?;
        Ok(self.roles_satisfied(&access, required))
    }

    /// Holds any of `required` roles, or is super admin
    pub fn roles_satisfied(&self, access: &EffectiveAccess, required: &[String]) -> bool {
        required.is_empty()
            || self.is_super_admin(access)
            || required.iter().any(|role| access.has_role(role))
    }

    /// Required permissions missing from already resolved access
    pub fn permissions_missing(&self, access: &EffectiveAccess, required: &[String]) -> Vec<String> {
        if self.is_super_admin(access) {
            return Vec::new();
        }
        required
            .iter()
            .filter(|permission| !access.has_permission(permission))
            .cloned()
            .collect()
    }

    /// Holds every one of `required`, or is super admin
    pub async fn check_permissions(
        &self,
        principal: &Principal,
        required: &[String],
    ) -> Result<bool> {
        Ok(self.missing_permissions(principal, required).await?.is_empty())
    }

    /// Required permissions the principal lacks
    pub async fn missing_permissions(
        &self,
        principal: &Principal,
        required: &[String],
    ) -> Result<Vec<String>> {
        if required.is_empty() {
            return Ok(Vec::new());
        }
        let access = self.effective(principal).await?;
        Ok(self.permissions_missing(&access, required))
    }

    /// Every effective permission with its source, for audit
    ///
    /// A permission granted directly is reported as direct even when a
    /// held role implies it too.
    pub async fn explain(&self, principal: &Principal) -> Result<Vec<PermissionGrant>> {
        let access = self.effective(principal).await?;

        let mut grants: Vec<PermissionGrant> = access
            .direct_permissions
            .iter()
            .map(|permission| PermissionGrant {
                permission: permission.clone(),
                source: GrantSource::Direct,
            })
            .collect();

        grants.extend(
            access
                .role_permissions
                .iter()
                .filter(|(permission, _)| !access.direct_permissions.contains(*permission))
                .map(|(permission, role)| PermissionGrant {
                    permission: permission.clone(),
                    source: GrantSource::Role(role.clone()),
                }),
        );

        grants.sort_by(|a, b| a.permission.cmp(&b.permission));
        Ok(grants)
    }
}
