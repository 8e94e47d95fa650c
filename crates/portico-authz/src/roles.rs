//! Role-source injection.
//!
//! The core never talks to the user/role store itself; callers inject an
//! implementation of [`RoleSource`] (typically a thin query against the
//! relational user store) and the authority service caches its answers under
//! the `USER_ROLES` policy.

use async_trait::async_trait;

use crate::error::AuthzResult;

/// Well-known role names used by the static authorization table.
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CONTENT_ADMIN: &str = "content-admin";
pub const ROLE_CUSTOMER: &str = "customer";

/// The injected role-store collaborator.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Resolve the role assignments for a user. An unknown user resolves to
    /// an empty role list, not an error.
    async fn roles_for(&self, user_id: &str) -> AuthzResult<Vec<String>>;
}
