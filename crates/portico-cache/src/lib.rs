//! Two-tier caching for Portico edge services.
//!
//! ## Architecture
//!
//! - **Memory tier (DashMap)**: in-process, microsecond latency, per-instance
//! - **Durable tier (Redis or in-process)**: shared, millisecond latency
//! - **Pub/Sub**: cross-instance memory-tier invalidation
//!
//! ```text
//! get_with → memory tier → durable tier → source (DB / ERP / payments API)
//! ```
//!
//! Each logical data category (credentials, profile, roles, authority
//! decisions, ...) carries a [`CachePolicy`] pinning its namespace and TTL
//! pair; keys are built only through the [`key`] module so reads and writes
//! always agree.
//!
//! ## Graceful degradation
//!
//! Without a durable backend (or when it is down) the cache runs
//! memory-plus-source: correctness is unaffected, latency and cross-instance
//! sharing degrade.

pub mod durable;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod pubsub;
pub mod store;

pub use durable::{DurableStore, DurableStoreError, MemoryStore, RedisStore};
pub use key::{
    CacheKey, authority_key, context_hash, namespace_prefix, sap_authority_key, user_data_key,
    user_scope_prefix,
};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use policy::{
    AUTHORITY, CachePolicy, CREDENTIALS, NS_AUTHORITY, NS_SITE, NS_USER, SAP_AUTHORITY,
    SOLD_TO_PARTIES, USER_PROFILE, USER_ROLES,
};
pub use pubsub::{InvalidationListener, InvalidationMessage, InvalidationPublisher};
pub use store::{CacheError, CacheStatus, HybridCache};
