//! The edge authority helper: stateless, cache-independent request
//! authorization.
//!
//! This is the simple path for handlers that only need coarse role-based
//! CRUD authorization on catalog/content resources (products, news, orders).
//! ERP-scoped decisions go through the cached
//! [`AuthorityService`](crate::service::AuthorityService) instead; the two
//! paths share the role table in [`crate::policy`] but are wired explicitly
//! per endpoint.
//!
//! The helper is only invoked for mutating operations — anonymous read-only
//! access is handled upstream by the calling handler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::role_table_verdict;

/// One request-level authorization question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub user_id: String,
    #[serde(default)]
    pub user_roles: Vec<String>,
    pub resource: String,
    pub action: String,

    /// Specific resource instance, when the caller has one. Not consulted by
    /// the static table; carried for audit logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

/// Allow/deny with a human-auditable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Decide a request against the static role table.
///
/// An empty `user_id` is denied outright: this path only serves mutating
/// operations, which always require an authenticated caller.
pub fn check_request_access(request: &AccessRequest) -> AccessDecision {
    if request.user_id.is_empty() {
        return AccessDecision {
            allowed: false,
            reason: "Authentication required".to_string(),
        };
    }

    let verdict = role_table_verdict(&request.user_roles, &request.resource, &request.action);
    AccessDecision {
        allowed: verdict.allowed,
        reason: verdict.reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: &str, roles: &[&str], resource: &str, action: &str) -> AccessRequest {
        AccessRequest {
            user_id: user_id.to_string(),
            user_roles: roles.iter().map(|s| s.to_string()).collect(),
            resource: resource.to_string(),
            action: action.to_string(),
            resource_id: None,
            context: None,
        }
    }

    #[test]
    fn anonymous_caller_is_denied() {
        let decision = check_request_access(&request("", &[], "orders", "create"));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "Authentication required");
    }

    #[test]
    fn admin_may_delete_products() {
        let decision = check_request_access(&request("u1", &["admin"], "products", "delete"));
        assert!(decision.allowed);
    }

    #[test]
    fn customer_may_read_products() {
        let decision = check_request_access(&request("u2", &["customer"], "products", "read"));
        assert!(decision.allowed);
    }

    #[test]
    fn customer_may_not_delete_products() {
        let decision = check_request_access(&request("u3", &["customer"], "products", "delete"));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "Access denied");
    }

    #[test]
    fn content_admin_may_update_news() {
        let decision = check_request_access(&request("u4", &["content-admin"], "news", "update"));
        assert!(decision.allowed);
    }

    #[test]
    fn customer_may_create_orders() {
        let decision = check_request_access(&request("u5", &["customer"], "orders", "create"));
        assert!(decision.allowed);
    }
}
