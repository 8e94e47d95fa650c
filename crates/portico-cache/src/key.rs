//! Deterministic cache-key construction.
//!
//! Keys render as `namespace:segment[:segment...]`. Segments are
//! percent-escaped so the `:` delimiter can never occur inside a segment;
//! prefix matching on an encoded segment plus a trailing delimiter is
//! therefore exact (user `"1"` can never match entries belonging to user
//! `"10"`). Callers must use the same builder for writes and reads — keys
//! are opaque outside this module.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A fully-rendered cache key, bound to the namespace it was built under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: &'static str,
    rendered: String,
}

impl CacheKey {
    /// Build a key from a namespace and logical segments.
    ///
    /// Namespaces are crate-defined constants (`site`, `user`, `authority`)
    /// and are not escaped; segments are caller data and are.
    pub fn new(namespace: &'static str, segments: &[&str]) -> Self {
        let mut rendered = String::with_capacity(namespace.len() + segments.len() * 8);
        rendered.push_str(namespace);
        for segment in segments {
            rendered.push(':');
            rendered.push_str(&encode_segment(segment));
        }
        Self {
            namespace,
            rendered,
        }
    }

    /// Rebuild a key from its already-encoded segment string, exactly as
    /// rendered by [`as_str`](Self::as_str) minus the namespace prefix.
    /// Segments are taken verbatim; encoding them again would make keys with
    /// escaped segments unreachable.
    pub fn from_encoded(namespace: &'static str, encoded_segments: &str) -> Self {
        Self {
            namespace,
            rendered: format!("{namespace}:{encoded_segments}"),
        }
    }

    /// The full `namespace:...` string stored in both tiers.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Escape `%` and the `:` delimiter inside a single key segment.
fn encode_segment(segment: &str) -> String {
    if !segment.contains(['%', ':']) {
        return segment.to_string();
    }
    segment.replace('%', "%25").replace(':', "%3A")
}

/// Prefix matching every key in a namespace (trailing delimiter included).
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}

/// Prefix matching every key in `namespace` whose first segment is
/// `user_id`. Used for per-user bulk invalidation of authority decisions.
pub fn user_scope_prefix(namespace: &str, user_id: &str) -> String {
    format!("{namespace}:{}:", encode_segment(user_id))
}

/// Key for per-user cached data (`profile`, `roles`, `soldToParties`, ...)
/// with an optional qualifier segment.
pub fn user_data_key(
    namespace: &'static str,
    user_id: &str,
    category: &str,
    qualifier: Option<&str>,
) -> CacheKey {
    match qualifier {
        Some(q) => CacheKey::new(namespace, &[user_id, category, q]),
        None => CacheKey::new(namespace, &[user_id, category]),
    }
}

/// Key for a general authority decision. The context hash keeps decisions
/// cached under one context from leaking into a structurally different
/// context for the same (user, resource, operation) triple.
pub fn authority_key(
    namespace: &'static str,
    user_id: &str,
    resource: &str,
    operation: &str,
    context_hash: &str,
) -> CacheKey {
    CacheKey::new(namespace, &[user_id, resource, operation, context_hash])
}

/// Key for a SAP-scoped authority decision, folding in the sold-to and
/// ship-to qualifiers. Absent qualifiers render as `-` so the key shape is
/// stable regardless of which qualifiers are present.
pub fn sap_authority_key(
    namespace: &'static str,
    user_id: &str,
    sap_resource: &str,
    operation: &str,
    sold_to_id: Option<&str>,
    ship_to_id: Option<&str>,
) -> CacheKey {
    CacheKey::new(
        namespace,
        &[
            user_id,
            "sap",
            sap_resource,
            operation,
            sold_to_id.unwrap_or("-"),
            ship_to_id.unwrap_or("-"),
        ],
    )
}

/// Hash a context value into a short stable token for use inside cache keys.
///
/// The value is serialized to canonical JSON (`serde_json` object maps are
/// BTree-backed, so key order is stable) and digested with SHA-256, truncated
/// to 64 bits. The truncation makes this a uniqueness aid, not a security
/// boundary: semantically identical contexts always collide, and distinct
/// contexts collide only with negligible probability at cache scale.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized to JSON.
pub fn context_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&canonical);
    Ok(hex::encode(&digest[..8]))
}
