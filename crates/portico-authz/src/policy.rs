//! The policy-evaluation seam.
//!
//! [`PolicyEngine`] is the single interface behind both authorization code
//! paths: the cached [`AuthorityService`](crate::service::AuthorityService)
//! wraps an engine in the decision cache, while the edge helper
//! ([`check_request_access`](crate::edge::check_request_access)) calls the
//! same role table directly with no cache. Which path governs which resource
//! is an explicit wiring choice per endpoint, never an accident of both
//! existing.

use serde::Serialize;

use crate::context::AuthorityContext;
use crate::error::AuthzResult;
use crate::roles::{ROLE_ADMIN, ROLE_CONTENT_ADMIN, ROLE_CUSTOMER};

/// Raw allow/deny outcome of an evaluation, before it is stamped into an
/// [`AuthorityDecision`](crate::context::AuthorityDecision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// A policy evaluation strategy.
///
/// Implementations must be side-effect free: the authority service may call
/// them zero times (cache hit) or several times (racing misses) for the same
/// logical check.
pub trait PolicyEngine: Send + Sync {
    /// Evaluate one context against the resolved role set.
    ///
    /// # Errors
    ///
    /// Evaluation errors are converted to deny decisions at the service
    /// boundary; they never reach business callers.
    fn evaluate(&self, ctx: &AuthorityContext, roles: &[String]) -> AuthzResult<Verdict>;
}

/// The static role table shared by both authorization paths.
///
/// Rules, first match wins:
/// 1. `admin` may do anything.
/// 2. `content-admin` has full CRUD on `products` and `news`.
/// 3. `customer` may read anything.
/// 4. `customer` may create and read `orders`.
/// 5. Everything else is denied.
///
/// Intentionally small and auditable; richer rules belong in a different
/// [`PolicyEngine`] implementation, not in extra branches here.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleTablePolicy;

/// Resources the content-admin role manages.
const CONTENT_RESOURCES: [&str; 2] = ["products", "news"];

/// Apply the role table to one (roles, resource, action) triple.
pub fn role_table_verdict(roles: &[String], resource: &str, action: &str) -> Verdict {
    let has = |role: &str| roles.iter().any(|r| r == role);

    if has(ROLE_ADMIN) {
        return Verdict::allow("Admin access granted");
    }

    if has(ROLE_CONTENT_ADMIN)
        && CONTENT_RESOURCES.contains(&resource)
        && matches!(action, "create" | "update" | "delete" | "read")
    {
        return Verdict::allow("Content admin access granted");
    }

    if has(ROLE_CUSTOMER) {
        if action == "read" {
            return Verdict::allow("Customer read access granted");
        }
        if resource == "orders" && matches!(action, "create" | "read") {
            return Verdict::allow("Customer order access granted");
        }
    }

    Verdict::deny("Access denied")
}

impl PolicyEngine for RoleTablePolicy {
    fn evaluate(&self, ctx: &AuthorityContext, roles: &[String]) -> AuthzResult<Verdict> {
        Ok(role_table_verdict(roles, &ctx.resource, &ctx.operation))
    }
}
