//! Moka adapter: Implementation of PredictionCache.
//!
//! Bounded in-memory cache of finalized predictions, keyed by the SHA-256
//! hash of the validated features. No TTL: entries live until evicted.
//!
//! # Concurrency
//!
//! `moka::sync::Cache` is internally sharded and lock-free for reads.
//! Concurrent inserts to one key resolve last-write-wins. Eviction runs as
//! deferred maintenance, so `len()` may briefly exceed capacity.

use moka::sync::Cache;

use crate::ports::{CacheEntry, EvictionPolicy, PredictionCache};

/// Default number of cached predictions.
pub const DEFAULT_CAPACITY: u64 = 128;

/// Bounded prediction cache backed by moka.
pub struct MokaPredictionCache {
    cache: Cache<String, CacheEntry>,
    capacity: u64,
    policy: EvictionPolicy,
}

impl MokaPredictionCache {
    /// Create a cache with the given capacity and eviction policy.
    #[must_use]
    pub fn new(capacity: u64, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        let moka_policy = match policy {
            EvictionPolicy::Lru => moka::policy::EvictionPolicy::lru(),
            EvictionPolicy::TinyLfu => moka::policy::EvictionPolicy::tiny_lfu(),
        };
        let cache = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(moka_policy)
            .build();

        tracing::debug!("Prediction cache ready: capacity={capacity}, policy={policy:?}");
        Self {
            cache,
            capacity,
            policy,
        }
    }

    /// LRU cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY, EvictionPolicy::Lru)
    }

    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Apply pending evictions now.
    pub fn sync(&self) {
        self.cache.run_pending_tasks();
    }
}

impl Default for MokaPredictionCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl PredictionCache for MokaPredictionCache {
    fn put(&self, key: &str, entry: CacheEntry) {
        self.cache.insert(key.to_string(), entry);
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.cache.get(key)
    }

    fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Biomarker, ConfidenceLevel, GlucoseRisk, GlucoseSafety, PredictionDetail,
        PredictionMethod, PredictionResult,
    };
    use std::sync::Arc;

    fn entry(delta: f64) -> CacheEntry {
        CacheEntry::new(PredictionResult {
            id: format!("test-{delta}"),
            biomarker: Biomarker::Glucose,
            baseline: 100.0,
            delta,
            final_value: 100.0 + delta,
            constraints_applied: false,
            sanity_corrected: false,
            risk: GlucoseRisk::classify(100.0 + delta).into(),
            confidence: 0.85,
            confidence_level: ConfidenceLevel::High,
            prediction_method: PredictionMethod::Deterministic,
            detail: PredictionDetail::Glucose {
                safety: GlucoseSafety::default(),
            },
            created_at: chrono::Utc::now(),
        })
    }

    #[test]
    fn test_put_then_get_returns_identical_entry() {
        let cache = MokaPredictionCache::with_default_capacity();
        let stored = entry(42.125);
        cache.put("k1", stored.clone());

        let loaded = cache.get("k1").expect("Should hit");
        assert_eq!(loaded, stored);
        assert_eq!(loaded.result.delta.to_bits(), 42.125_f64.to_bits());
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = MokaPredictionCache::with_default_capacity();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_same_key_last_write_wins() {
        let cache = MokaPredictionCache::with_default_capacity();
        cache.put("k", entry(10.0));
        cache.put("k", entry(20.0));
        let loaded = cache.get("k").expect("Should hit");
        assert!((loaded.result.delta - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = MokaPredictionCache::new(4, EvictionPolicy::Lru);
        for i in 0..32 {
            cache.put(&format!("k{i}"), entry(f64::from(i)));
        }
        cache.sync();
        assert!(cache.len() <= 4);
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.policy(), EvictionPolicy::Lru);
        // The most recent write is retained.
        assert!(cache.get("k31").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = MokaPredictionCache::with_default_capacity();
        cache.put("a", entry(1.0));
        cache.clear();
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(MokaPredictionCache::with_default_capacity());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..16 {
                        let key = format!("t{t}-{i}");
                        cache.put(&key, entry(f64::from(i)));
                        assert!(cache.get(&key).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("Thread should finish");
        }
        cache.sync();
        assert!(cache.len() <= DEFAULT_CAPACITY);
    }
}
