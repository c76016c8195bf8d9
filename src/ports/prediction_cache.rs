//! Prediction cache port: Trait for the bounded store of finalized predictions.
//!
//! The cache is what ties an explain call to the exact numbers a previous
//! predict call returned.

use serde::{Deserialize, Serialize};

use crate::domain::PredictionResult;

/// A cached prediction and when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: PredictionResult,
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(result: PredictionResult) -> Self {
        Self {
            result,
            cached_at: chrono::Utc::now(),
        }
    }
}

/// Eviction policy applied once capacity is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the least recently used entry.
    #[default]
    Lru,
    /// Admit by access frequency, evict by recency (TinyLFU).
    TinyLfu,
}

/// Trait for prediction cache operations.
///
/// Implementations must tolerate concurrent access. Writes to the same key
/// resolve last-write-wins; entries are never mutated in place.
pub trait PredictionCache: Send + Sync {
    /// Store a finalized prediction under its feature hash.
    fn put(&self, key: &str, entry: CacheEntry);

    /// Fetch a prediction by feature hash.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Number of live entries (may lag pending evictions).
    fn len(&self) -> u64;

    /// Whether the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    fn capacity(&self) -> u64;

    /// Drop every entry.
    fn clear(&self);
}
