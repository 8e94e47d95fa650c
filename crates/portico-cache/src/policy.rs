//! Named cache policies for each logical data category.
//!
//! A policy pins the namespace a category lives under and its TTL pair.
//! The memory TTL is expected to be shorter than the durable TTL: the memory
//! tier is the fast front, so values routinely outlive their memory copy and
//! are restored from the durable tier via backfill. TTLs are differentiated
//! by volatility and security sensitivity — authority decisions revalidate
//! far more often than external-system credentials.

use std::time::Duration;

/// Namespace for site-wide data (external-system credentials and similar).
pub const NS_SITE: &str = "site";

/// Namespace for per-user data (profile, roles, related-party lists).
pub const NS_USER: &str = "user";

/// Namespace for authorization decisions.
pub const NS_AUTHORITY: &str = "authority";

/// TTL pair and namespace for one data category. Immutable, defined once at
/// process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Time-to-live in the in-process memory tier.
    pub memory_ttl: Duration,
    /// Time-to-live in the durable KV tier.
    pub kv_ttl: Duration,
    /// Namespace the category's keys live under; the unit of bulk
    /// invalidation.
    pub namespace: &'static str,
}

impl CachePolicy {
    pub const fn new(memory_ttl: Duration, kv_ttl: Duration, namespace: &'static str) -> Self {
        Self {
            memory_ttl,
            kv_ttl,
            namespace,
        }
    }
}

/// External-system credentials: rarely rotated, expensive to fetch.
pub const CREDENTIALS: CachePolicy = CachePolicy::new(
    Duration::from_secs(30 * 60),
    Duration::from_secs(4 * 60 * 60),
    NS_SITE,
);

/// Per-user profile data: changes occasionally.
pub const USER_PROFILE: CachePolicy = CachePolicy::new(
    Duration::from_secs(10 * 60),
    Duration::from_secs(30 * 60),
    NS_USER,
);

/// Per-user sold-to/ship-to party lists: semi-static reference data.
pub const SOLD_TO_PARTIES: CachePolicy = CachePolicy::new(
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    NS_USER,
);

/// General authority decisions: security-sensitive, revalidated often.
pub const AUTHORITY: CachePolicy = CachePolicy::new(
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    NS_AUTHORITY,
);

/// SAP-scoped authority decisions: business-critical, shortest TTLs.
pub const SAP_AUTHORITY: CachePolicy = CachePolicy::new(
    Duration::from_secs(3 * 60),
    Duration::from_secs(10 * 60),
    NS_AUTHORITY,
);

/// User role assignments: infrequent change, high reuse.
pub const USER_ROLES: CachePolicy = CachePolicy::new(
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    NS_USER,
);
