//! Durable KV tier contract and backends.
//!
//! The durable tier is the slower, shared half of the hybrid cache. The
//! store contract is deliberately small: byte-valued get/set with TTL,
//! single-key delete, prefix delete, and a liveness probe. Every failure of
//! this tier is a *soft* failure — `HybridCache` logs it and proceeds as if
//! the tier had missed, so only latency and durability degrade, never
//! correctness.
//!
//! Backends:
//! - [`RedisStore`]: production backend, pooled connections, shared across
//!   horizontally-scaled instances.
//! - [`MemoryStore`]: in-process backend for tests and single-instance
//!   deployments where running Redis is not worth it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;

/// Errors raised by a durable-store backend.
///
/// Callers inside this crate treat every variant as a tier miss.
#[derive(Debug, thiserror::Error)]
pub enum DurableStoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Contract every durable KV backend must satisfy.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError>;

    /// Store `value` under `key` with the given TTL, overwriting any
    /// previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), DurableStoreError>;

    /// Remove a single key, reporting whether it was present. Removing an
    /// absent key is not an error.
    async fn delete(&self, key: &str) -> Result<bool, DurableStoreError>;

    /// Remove every key starting with `prefix`, returning how many were
    /// removed. Atomic per individual key, not across the whole prefix.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, DurableStoreError>;

    /// Liveness probe for status reporting.
    async fn ping(&self) -> bool;
}

// =============================================================================
// Redis backend
// =============================================================================

/// Redis-backed durable store using a deadpool connection pool.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// Whole-second TTL for `SETEX`, rounded up so the durable entry never
/// expires before the policy says it may. `SETEX` rejects a zero expiry, so
/// a zero duration still becomes one second.
fn setex_ttl_secs(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

/// Escape Redis glob metacharacters so a key prefix can be used verbatim in
/// a `SCAN MATCH` pattern.
fn escape_match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), DurableStoreError> {
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(key, value, setex_ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DurableStoreError> {
        let mut conn = self.pool.get().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, DurableStoreError> {
        let mut conn = self.pool.get().await?;
        let pattern = escape_match_pattern(prefix);

        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }
        let removed = keys.len();
        conn.del::<_, ()>(keys).await?;
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        match self.pool.get().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

struct StoredValue {
    data: Vec<u8>,
    expires_at: Instant,
}

/// DashMap-backed durable store for tests and single-instance deployments.
///
/// "Durable" here means durable relative to the memory tier's shorter TTLs;
/// contents do not survive a process restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, ready to plug into `HybridCache`.
    pub fn shared() -> Arc<dyn DurableStore> {
        Arc::new(Self::new())
    }

    /// Number of live (possibly expired, not yet collected) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), DurableStoreError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DurableStoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, DurableStoreError> {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setex_ttl_rounds_up_and_never_hits_zero() {
        assert_eq!(setex_ttl_secs(Duration::from_secs(2)), 2);
        assert_eq!(setex_ttl_secs(Duration::from_millis(2900)), 3);
        assert_eq!(setex_ttl_secs(Duration::from_millis(500)), 1);
        assert_eq!(setex_ttl_secs(Duration::ZERO), 1);
    }

    #[test]
    fn match_pattern_escapes_glob_metacharacters() {
        assert_eq!(escape_match_pattern("authority:u1:"), "authority:u1:*");
        assert_eq!(escape_match_pattern("user:a*b:"), "user:a\\*b:*");
        assert_eq!(escape_match_pattern("user:[x]?:"), "user:\\[x\\]\\?:*");
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store
            .set("user:u1:profile", b"data", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.get("user:u1:profile").await.unwrap(),
            Some(b"data".to_vec())
        );

        assert!(store.delete("user:u1:profile").await.unwrap());
        assert_eq!(store.get("user:u1:profile").await.unwrap(), None);
        assert!(!store.delete("user:u1:profile").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_prefix_delete_is_exact() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("authority:1:orders", b"a", ttl).await.unwrap();
        store.set("authority:10:orders", b"b", ttl).await.unwrap();
        store.set("user:1:profile", b"c", ttl).await.unwrap();

        let removed = store.delete_prefix("authority:1:").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("authority:1:orders").await.unwrap(), None);
        assert!(store.get("authority:10:orders").await.unwrap().is_some());
        assert!(store.get("user:1:profile").await.unwrap().is_some());
    }
}
