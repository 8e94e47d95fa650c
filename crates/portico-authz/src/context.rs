//! Authority check inputs and outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One authority check: who wants to do what to which resource, under which
/// business context. Constructed per request, never persisted.
///
/// The identity triple (`user_id`, `resource`, `operation`) goes into the
/// cache key verbatim; everything else is folded in via a context hash so a
/// decision cached under one context can never be returned for a
/// structurally different one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityContext {
    pub user_id: String,
    pub resource: String,
    pub operation: String,

    /// Roles, when the caller already resolved them. Left empty, the
    /// authority service resolves roles itself through its role source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_roles: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_to_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_to_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl AuthorityContext {
    pub fn new(
        user_id: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resource: resource.into(),
            operation: operation.into(),
            user_roles: None,
            sold_to_id: None,
            ship_to_id: None,
            brand_id: None,
            metadata: None,
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.user_roles = Some(roles);
        self
    }

    pub fn with_sold_to(mut self, sold_to_id: impl Into<String>) -> Self {
        self.sold_to_id = Some(sold_to_id.into());
        self
    }

    pub fn with_ship_to(mut self, ship_to_id: impl Into<String>) -> Self {
        self.ship_to_id = Some(ship_to_id.into());
        self
    }

    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    /// The non-identity fields, as hashed into the decision cache key.
    pub(crate) fn fingerprint(&self) -> ContextFingerprint<'_> {
        ContextFingerprint {
            user_roles: self.user_roles.as_deref(),
            sold_to_id: self.sold_to_id.as_deref(),
            ship_to_id: self.ship_to_id.as_deref(),
            brand_id: self.brand_id.as_deref(),
            metadata: self.metadata.as_ref(),
        }
    }
}

/// Borrowed view over the context fields that differentiate otherwise
/// identical (user, resource, operation) checks.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContextFingerprint<'a> {
    pub user_roles: Option<&'a [String]>,
    pub sold_to_id: Option<&'a str>,
    pub ship_to_id: Option<&'a str>,
    pub brand_id: Option<&'a str>,
    pub metadata: Option<&'a Map<String, Value>>,
}

/// The outcome of an authority check.
///
/// Cached and freshly computed decisions are identical in shape; only the
/// `cached` flag inside `metadata` tells them apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityDecision {
    pub allowed: bool,
    pub reason: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AuthorityDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self::decided(true, reason)
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::decided(false, reason)
    }

    fn decided(allowed: bool, reason: impl Into<String>) -> Self {
        Self {
            allowed,
            reason: reason.into(),
            metadata: Map::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this decision was served from cache.
    pub fn is_cached(&self) -> bool {
        self.metadata
            .get("cached")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub(crate) fn mark_cached(mut self, cached: bool) -> Self {
        self.metadata.insert("cached".to_string(), Value::Bool(cached));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_serializes_camel_case() {
        let decision = AuthorityDecision::allow("Admin access granted").mark_cached(false);
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["allowed"], Value::Bool(true));
        assert_eq!(json["reason"], "Admin access granted");
        assert_eq!(json["metadata"]["cached"], Value::Bool(false));
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn cached_marker_round_trips() {
        let fresh = AuthorityDecision::deny("Access denied").mark_cached(false);
        assert!(!fresh.is_cached());

        let encoded = serde_json::to_vec(&fresh).unwrap();
        let revived: AuthorityDecision = serde_json::from_slice(&encoded).unwrap();
        assert!(revived.mark_cached(true).is_cached());
    }

    #[test]
    fn fingerprint_ignores_identity_fields() {
        let a = AuthorityContext::new("u1", "orders", "create").with_sold_to("s1");
        let b = AuthorityContext::new("u2", "products", "read").with_sold_to("s1");

        // Same non-identity fields, different identity: fingerprints agree.
        let fa = serde_json::to_value(a.fingerprint()).unwrap();
        let fb = serde_json::to_value(b.fingerprint()).unwrap();
        assert_eq!(fa, fb);
    }
}
