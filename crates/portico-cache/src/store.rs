//! Hybrid two-tier cache store.
//!
//! ## Architecture
//!
//! - **Memory tier (DashMap)**: in-process, microsecond latency, per-instance
//! - **Durable tier ([`DurableStore`])**: shared across instances, millisecond
//!   latency, optional
//!
//! ```text
//! get_with → memory tier → durable tier → source function
//!                ↓              ↓               ↓
//!            <1µs latency  ~5ms latency   ~50ms+ latency
//! ```
//!
//! A durable hit backfills the memory tier with a fresh timestamp and the
//! memory TTL, so the common case of "fresh in KV, evicted from memory" is a
//! single slow read followed by fast ones.
//!
//! ## Concurrency caveats
//!
//! There is no single-flight de-duplication: the memory check and the
//! source-then-writeback sequence are not atomic, so concurrent `get_with`
//! calls for the same key may each invoke the source function. Likewise an
//! `invalidate` racing an in-flight source fetch can be overwritten by that
//! fetch's writeback; last-writer-wins per tier is the accepted model given
//! the short TTLs involved. Callers needing stronger guarantees must
//! coalesce at their own layer.
//!
//! ## Failure model
//!
//! Source errors propagate to the caller, are never cached, and never fall
//! back to stale data. Durable-tier errors are soft: logged and treated as a
//! tier miss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::durable::DurableStore;
use crate::key::{self, CacheKey};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::policy::CachePolicy;
use crate::pubsub::InvalidationPublisher;

/// Errors surfaced by [`HybridCache`] operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The injected source function failed. Propagated unchanged to the
    /// caller; never cached.
    #[error("source fetch failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A cached value could not be (de)serialized.
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A memory-tier entry. Owned exclusively by the store; expiry is evaluated
/// lazily on read, the background sweep only bounds memory growth.
#[derive(Clone)]
pub(crate) struct MemoryEntry {
    data: Arc<Vec<u8>>,
    written_at: Instant,
    ttl: Duration,
}

impl MemoryEntry {
    fn new(data: Arc<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            data,
            written_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.written_at.elapsed() > self.ttl
    }
}

/// Introspection snapshot returned by [`HybridCache::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub memory_entries: usize,
    pub durable_available: bool,
    pub metrics: CacheMetricsSnapshot,
}

/// The two-tier cache. Explicitly constructed and dependency-injected —
/// there is deliberately no global instance, so tests can run isolated
/// caches side by side. Wrap in `Arc` and share for process lifetime.
pub struct HybridCache {
    memory: Arc<DashMap<String, MemoryEntry>>,
    durable: Option<Arc<dyn DurableStore>>,
    publisher: Option<InvalidationPublisher>,
    metrics: CacheMetrics,
}

impl HybridCache {
    /// Create a cache over an optional durable tier.
    pub fn new(durable: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            memory: Arc::new(DashMap::new()),
            durable,
            publisher: None,
            metrics: CacheMetrics::new(),
        }
    }

    /// Memory-tier-only cache (single-instance mode, no durable backend).
    pub fn local() -> Self {
        Self::new(None)
    }

    /// Attach a cross-instance invalidation publisher. Invalidations are
    /// then fanned out to the memory tiers of other instances.
    pub fn with_publisher(mut self, publisher: InvalidationPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Handle to the memory tier for the pub/sub listener.
    pub(crate) fn memory_handle(&self) -> Arc<DashMap<String, MemoryEntry>> {
        Arc::clone(&self.memory)
    }

    /// Resolve `key` through memory → durable → source.
    ///
    /// On a source hit the value is written to both tiers with the TTLs from
    /// `policy` before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Source`] if the source function fails (the
    /// failure is not cached) and [`CacheError::Codec`] if a value cannot be
    /// serialized for storage.
    pub async fn get_with<T, F, Fut, E>(
        &self,
        cache_key: &CacheKey,
        policy: &CachePolicy,
        source: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(value) = self.read_tiers(cache_key, policy).await {
            return Ok(value);
        }

        let value = source()
            .await
            .map_err(|e| CacheError::Source(e.into()))?;
        self.metrics.record_source_hit();
        tracing::debug!(key = %cache_key, "cache miss, fetched from source");

        self.write_tiers(cache_key, &value, policy).await?;
        Ok(value)
    }

    /// Cache-only lookup: memory → durable, never the source. Used by batch
    /// flows that must not trigger evaluation on a miss.
    pub async fn peek<T>(&self, cache_key: &CacheKey, policy: &CachePolicy) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.read_tiers(cache_key, policy).await
    }

    /// Unconditionally (over)write both tiers with fresh timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the value cannot be serialized.
    pub async fn insert<T>(
        &self,
        cache_key: &CacheKey,
        value: &T,
        policy: &CachePolicy,
    ) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        self.write_tiers(cache_key, value, policy).await
    }

    /// Delete a single key from both tiers. Returns the number of tier
    /// entries actually removed (0 to 2).
    pub async fn invalidate(&self, cache_key: &CacheKey) -> usize {
        let mut removed = usize::from(self.memory.remove(cache_key.as_str()).is_some());
        if let Some(durable) = &self.durable {
            match durable.delete(cache_key.as_str()).await {
                Ok(existed) => removed += usize::from(existed),
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "durable delete failed");
                }
            }
        }
        if let Some(publisher) = &self.publisher {
            publisher.publish_key(cache_key.as_str());
        }
        tracing::debug!(key = %cache_key, removed = removed, "cache invalidated");
        removed
    }

    /// Delete every entry under `namespace:` from both tiers. Returns the
    /// number of entries removed (memory + durable).
    pub async fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.invalidate_prefix(&key::namespace_prefix(namespace))
            .await
    }

    /// Delete every entry whose full key starts with `prefix`. Atomic per
    /// individual key: readers observe each key as fully present or fully
    /// gone, never half-invalidated; there is no transaction across keys.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0usize;
        self.memory.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if let Some(durable) = &self.durable {
            match durable.delete_prefix(prefix).await {
                Ok(count) => removed += count,
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "durable prefix delete failed");
                }
            }
        }

        if let Some(publisher) = &self.publisher {
            publisher.publish_prefix(prefix);
        }
        tracing::debug!(prefix = %prefix, removed = removed, "prefix invalidated");
        removed
    }

    /// Introspection snapshot. No side effects on entries or counters.
    pub async fn status(&self) -> CacheStatus {
        let durable_available = match &self.durable {
            Some(durable) => durable.ping().await,
            None => false,
        };
        CacheStatus {
            memory_entries: self.memory.len(),
            durable_available,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Current counter values without the durable-tier probe.
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Proactively drop expired memory entries. Bounds memory growth only;
    /// read-time expiry checks keep results correct regardless of when (or
    /// whether) this runs. Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0usize;
        self.memory.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Spawn the periodic memory sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // First tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed = removed, "swept expired memory entries");
                }
            }
        })
    }

    // -------------------------------------------------------------------------
    // Tier plumbing
    // -------------------------------------------------------------------------

    /// Memory check is synchronous; only the durable lookup suspends.
    async fn read_tiers<T>(&self, cache_key: &CacheKey, policy: &CachePolicy) -> Option<T>
    where
        T: DeserializeOwned,
    {
        if let Some(entry) = self.memory.get(cache_key.as_str()) {
            if !entry.is_expired() {
                let data = Arc::clone(&entry.data);
                drop(entry);
                match serde_json::from_slice::<T>(&data) {
                    Ok(value) => {
                        self.metrics.record_memory_hit();
                        tracing::debug!(key = %cache_key, "cache hit (memory)");
                        return Some(value);
                    }
                    Err(e) => {
                        // Undecodable entry: drop it and fall through as a miss.
                        tracing::warn!(key = %cache_key, error = %e, "dropping undecodable memory entry");
                        self.memory.remove(cache_key.as_str());
                    }
                }
            } else {
                drop(entry);
                self.memory.remove(cache_key.as_str());
            }
        }
        self.metrics.record_memory_miss();

        let durable = self.durable.as_ref()?;

        match durable.get(cache_key.as_str()).await {
            Ok(Some(data)) => match serde_json::from_slice::<T>(&data) {
                Ok(value) => {
                    self.metrics.record_kv_hit();
                    tracing::debug!(key = %cache_key, "cache hit (durable), backfilling memory");
                    self.memory.insert(
                        cache_key.as_str().to_string(),
                        MemoryEntry::new(Arc::new(data), policy.memory_ttl),
                    );
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "dropping undecodable durable entry");
                    if let Err(del_err) = durable.delete(cache_key.as_str()).await {
                        tracing::warn!(key = %cache_key, error = %del_err, "durable delete failed");
                    }
                    self.metrics.record_kv_miss();
                    None
                }
            },
            Ok(None) => {
                self.metrics.record_kv_miss();
                None
            }
            Err(e) => {
                // Soft failure: degrade to a tier miss and fall through.
                tracing::warn!(key = %cache_key, error = %e, "durable get failed, treating as miss");
                self.metrics.record_kv_miss();
                None
            }
        }
    }

    async fn write_tiers<T>(
        &self,
        cache_key: &CacheKey,
        value: &T,
        policy: &CachePolicy,
    ) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let data = Arc::new(serde_json::to_vec(value)?);

        self.memory.insert(
            cache_key.as_str().to_string(),
            MemoryEntry::new(Arc::clone(&data), policy.memory_ttl),
        );

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.set(cache_key.as_str(), &data, policy.kv_ttl).await {
                tracing::warn!(key = %cache_key, error = %e, "durable set failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{DurableStoreError, MemoryStore};
    use crate::policy::{self, CachePolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_policy(memory_ttl: Duration, kv_ttl: Duration) -> CachePolicy {
        CachePolicy::new(memory_ttl, kv_ttl, policy::NS_USER)
    }

    fn profile_key(user_id: &str) -> CacheKey {
        key::user_data_key(policy::NS_USER, user_id, "profile", None)
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        async fn fetch(&self) -> Result<String, std::convert::Infallible> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("fetched".to_string())
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn get_populates_both_tiers_and_memoizes() {
        let durable = Arc::new(MemoryStore::new());
        let cache = HybridCache::new(Some(durable.clone()));
        let source = CountingSource::new();
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key = profile_key("u1");

        let value: String = cache
            .get_with(&key, &policy, || source.fetch())
            .await
            .unwrap();
        assert_eq!(value, "fetched");
        assert_eq!(source.count(), 1);
        assert!(durable.get(key.as_str()).await.unwrap().is_some());

        // Second call is served from memory, source untouched.
        let value: String = cache
            .get_with(&key, &policy, || source.fetch())
            .await
            .unwrap();
        assert_eq!(value, "fetched");
        assert_eq!(source.count(), 1);

        let snap = cache.metrics();
        assert_eq!(snap.memory_hits, 1);
        assert_eq!(snap.memory_misses, 1);
        assert_eq!(snap.kv_misses, 1);
        assert_eq!(snap.source_hits, 1);
    }

    #[tokio::test]
    async fn independent_ttls_backfill_memory_from_durable() {
        let cache = HybridCache::new(Some(Arc::new(MemoryStore::new())));
        let source = CountingSource::new();
        // Memory expires almost immediately, durable stays fresh.
        let policy = test_policy(Duration::from_millis(10), Duration::from_secs(120));
        let key = profile_key("u1");

        let _: String = cache
            .get_with(&key, &policy, || source.fetch())
            .await
            .unwrap();
        assert_eq!(source.count(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Memory miss, durable hit, no new source call.
        let value: String = cache
            .get_with(&key, &policy, || source.fetch())
            .await
            .unwrap();
        assert_eq!(value, "fetched");
        assert_eq!(source.count(), 1);

        let snap = cache.metrics();
        assert_eq!(snap.kv_hits, 1);
        assert_eq!(snap.source_hits, 1);

        // The backfill restored the memory tier.
        let _: String = cache
            .get_with(&key, &policy, || source.fetch())
            .await
            .unwrap();
        assert_eq!(cache.metrics().memory_hits, 1);
    }

    #[tokio::test]
    async fn source_errors_propagate_and_are_not_cached() {
        let cache = HybridCache::new(Some(Arc::new(MemoryStore::new())));
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key = profile_key("u1");
        let calls = AtomicUsize::new(0);

        let failing = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(std::io::Error::other("upstream down"))
        };

        let err = cache.get_with::<String, _, _, _>(&key, &policy, failing).await;
        assert!(matches!(err, Err(CacheError::Source(_))));

        // The failure was not cached: the next call tries the source again.
        let _ = cache.get_with::<String, _, _, _>(&key, &policy, failing).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.metrics().source_hits, 0);
    }

    #[tokio::test]
    async fn invalidate_hits_only_the_exact_key() {
        let cache = HybridCache::new(Some(Arc::new(MemoryStore::new())));
        let source = CountingSource::new();
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key_a = profile_key("u1");
        let key_b = profile_key("u2");

        let _: String = cache.get_with(&key_a, &policy, || source.fetch()).await.unwrap();
        let _: String = cache.get_with(&key_b, &policy, || source.fetch()).await.unwrap();
        assert_eq!(source.count(), 2);

        // Entry held in both tiers; absent on the second attempt.
        assert_eq!(cache.invalidate(&key_a).await, 2);
        assert_eq!(cache.invalidate(&key_a).await, 0);

        let _: String = cache.get_with(&key_a, &policy, || source.fetch()).await.unwrap();
        assert_eq!(source.count(), 3);

        // Same-namespace neighbor is unaffected.
        let _: String = cache.get_with(&key_b, &policy, || source.fetch()).await.unwrap();
        assert_eq!(source.count(), 3);
    }

    #[tokio::test]
    async fn namespace_invalidation_spares_other_namespaces() {
        let cache = HybridCache::new(Some(Arc::new(MemoryStore::new())));
        let user_policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let site_policy =
            CachePolicy::new(Duration::from_secs(60), Duration::from_secs(120), policy::NS_SITE);

        let user_key = profile_key("u1");
        let site_key = CacheKey::new(policy::NS_SITE, &["credentials", "sap"]);

        cache.insert(&user_key, &"user-data", &user_policy).await.unwrap();
        cache.insert(&site_key, &"site-data", &site_policy).await.unwrap();

        let removed = cache.invalidate_namespace(policy::NS_USER).await;
        // Entry existed in both tiers.
        assert_eq!(removed, 2);

        assert_eq!(cache.peek::<String>(&user_key, &user_policy).await, None);
        assert_eq!(
            cache.peek::<String>(&site_key, &site_policy).await,
            Some("site-data".to_string())
        );
    }

    #[tokio::test]
    async fn peek_never_calls_source() {
        let cache = HybridCache::new(Some(Arc::new(MemoryStore::new())));
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key = profile_key("u1");

        assert_eq!(cache.peek::<String>(&key, &policy).await, None);

        cache.insert(&key, &"stored", &policy).await.unwrap();
        assert_eq!(
            cache.peek::<String>(&key, &policy).await,
            Some("stored".to_string())
        );
    }

    #[tokio::test]
    async fn set_overwrites_both_tiers() {
        let durable = Arc::new(MemoryStore::new());
        let cache = HybridCache::new(Some(durable.clone()));
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key = profile_key("u1");

        cache.insert(&key, &"v1", &policy).await.unwrap();
        cache.insert(&key, &"v2", &policy).await.unwrap();

        assert_eq!(cache.peek::<String>(&key, &policy).await, Some("v2".to_string()));
        let raw = durable.get(key.as_str()).await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<String>(&raw).unwrap(), "v2");
    }

    #[tokio::test]
    async fn metrics_reset_and_per_call_accounting() {
        let cache = HybridCache::new(Some(Arc::new(MemoryStore::new())));
        let source = CountingSource::new();
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key = profile_key("u1");

        let _: String = cache.get_with(&key, &policy, || source.fetch()).await.unwrap();
        let _: String = cache.get_with(&key, &policy, || source.fetch()).await.unwrap();

        cache.reset_metrics();
        assert_eq!(cache.metrics(), CacheMetricsSnapshot::default());

        // One memory hit, nothing else, for a fully warm read.
        let _: String = cache.get_with(&key, &policy, || source.fetch()).await.unwrap();
        let snap = cache.metrics();
        assert_eq!(snap.memory_hits, 1);
        assert_eq!(snap.memory_misses, 0);
        assert_eq!(snap.kv_hits, 0);
        assert_eq!(snap.kv_misses, 0);
        assert_eq!(snap.source_hits, 0);
    }

    #[tokio::test]
    async fn cleanup_drops_only_expired_entries() {
        let cache = HybridCache::local();
        let short = test_policy(Duration::from_millis(10), Duration::from_secs(120));
        let long = test_policy(Duration::from_secs(60), Duration::from_secs(120));

        cache.insert(&profile_key("u1"), &"a", &short).await.unwrap();
        cache.insert(&profile_key("u2"), &"b", &long).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.status().await.memory_entries, 1);
    }

    /// Durable backend that fails every operation.
    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, DurableStoreError> {
            Err(redis::RedisError::from(std::io::Error::other("down")).into())
        }

        async fn set(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Duration,
        ) -> Result<(), DurableStoreError> {
            Err(redis::RedisError::from(std::io::Error::other("down")).into())
        }

        async fn delete(&self, _key: &str) -> Result<bool, DurableStoreError> {
            Err(redis::RedisError::from(std::io::Error::other("down")).into())
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, DurableStoreError> {
            Err(redis::RedisError::from(std::io::Error::other("down")).into())
        }

        async fn ping(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn durable_failures_degrade_to_source() {
        let cache = HybridCache::new(Some(Arc::new(BrokenStore)));
        let source = CountingSource::new();
        let policy = test_policy(Duration::from_secs(60), Duration::from_secs(120));
        let key = profile_key("u1");

        // Every operation against the durable tier fails, but the call still
        // resolves via memory/source.
        let value: String = cache.get_with(&key, &policy, || source.fetch()).await.unwrap();
        assert_eq!(value, "fetched");
        assert_eq!(source.count(), 1);

        // The memory tier still works on its own.
        let _: String = cache.get_with(&key, &policy, || source.fetch()).await.unwrap();
        assert_eq!(source.count(), 1);

        cache.invalidate(&key).await;
        let _: String = cache.get_with(&key, &policy, || source.fetch()).await.unwrap();
        assert_eq!(source.count(), 2);

        assert!(!cache.status().await.durable_available);
    }
}
