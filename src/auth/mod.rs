//! Identity and access control

pub mod guard;
pub mod principal;
pub mod provider;
pub mod rbac;

pub use guard::{BearerTokenGuard, Guard, SessionGuard, StaticTokenResolver, TokenResolver};
pub use principal::Principal;
pub use provider::{CachedRoleProvider, Grants, RoleProvider, StaticRoleProvider};
pub use rbac::{
    AccessControl, EffectiveAccess, GrantSource, PermissionGrant, RoleHierarchy, SUPER_ADMIN,
};
