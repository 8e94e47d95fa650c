//! Process-wide cache counters.
//!
//! One `CacheMetrics` instance lives for the lifetime of a `HybridCache`.
//! Every `get` resolves to exactly one of memory-hit/memory-miss, plus one of
//! kv-hit/kv-miss when memory missed and the durable tier was consulted, plus
//! a source-hit when both tiers missed. Counters are monotonic until an
//! explicit `reset()`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Hit/miss counters for both cache tiers and the source fallback.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    kv_hits: AtomicU64,
    kv_misses: AtomicU64,
    source_hits: AtomicU64,
}

/// A point-in-time copy of the counters, safe to serialize into status
/// responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub kv_hits: u64,
    pub kv_misses: u64,
    pub source_hits: u64,
}

impl CacheMetricsSnapshot {
    /// Memory-tier hit rate as a percentage.
    pub fn memory_hit_rate(&self) -> f64 {
        let total = self.memory_hits + self.memory_misses;
        if total == 0 {
            0.0
        } else {
            (self.memory_hits as f64 / total as f64) * 100.0
        }
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kv_hit(&self) {
        self.kv_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kv_miss(&self) {
        self.kv_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_hit(&self) {
        self.source_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            kv_hits: self.kv_hits.load(Ordering::Relaxed),
            kv_misses: self.kv_misses.load(Ordering::Relaxed),
            source_hits: self.source_hits.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters. Administrative operation, safe to call repeatedly.
    pub fn reset(&self) {
        self.memory_hits.store(0, Ordering::Relaxed);
        self.memory_misses.store(0, Ordering::Relaxed);
        self.kv_hits.store(0, Ordering::Relaxed);
        self.kv_misses.store(0, Ordering::Relaxed);
        self.source_hits.store(0, Ordering::Relaxed);
    }
}
