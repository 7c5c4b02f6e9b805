//! Cache Manager Implementation
//!
//! In-memory LRU over accumulator checkpoints, in front of the RocksDB store.

use std::num::NonZeroUsize;
use std::sync::Arc;
use parking_lot::RwLock;
use lru::LruCache;

use crate::crypto::AccumulatorValue;
use crate::denomination::Denomination;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Checkpoint cache size (entries)
    pub checkpoint_cache_size: usize,

    /// Enable cache statistics collection
    pub enable_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            checkpoint_cache_size: 100_000,
            enable_stats: true,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub checkpoint_hits: u64,
    pub checkpoint_misses: u64,
}

impl CacheStats {
    pub fn checkpoint_hit_rate(&self) -> f64 {
        if self.checkpoint_hits + self.checkpoint_misses == 0 {
            0.0
        } else {
            self.checkpoint_hits as f64 / (self.checkpoint_hits + self.checkpoint_misses) as f64
        }
    }
}

type CheckpointKey = (Denomination, u64);

/// Checkpoint cache keyed by (denomination, height)
pub struct CacheManager {
    checkpoint_cache: Arc<RwLock<LruCache<CheckpointKey, AccumulatorValue>>>,

    stats: Arc<RwLock<CacheStats>>,

    config: CacheConfig,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.checkpoint_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            checkpoint_cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            config,
        }
    }

    pub fn get_checkpoint(&self, denomination: Denomination, height: u64) -> Option<AccumulatorValue> {
        let result = self.checkpoint_cache.write().get(&(denomination, height)).copied();

        if self.config.enable_stats {
            let mut stats = self.stats.write();
            if result.is_some() {
                stats.checkpoint_hits += 1;
            } else {
                stats.checkpoint_misses += 1;
            }
        }

        result
    }

    pub fn put_checkpoint(&self, denomination: Denomination, height: u64, value: AccumulatorValue) {
        self.checkpoint_cache.write().put((denomination, height), value);
    }

    /// Evict entries above `height` after a rollback
    pub fn invalidate_above(&self, height: u64) {
        let mut cache = self.checkpoint_cache.write();
        let stale: Vec<CheckpointKey> = cache.iter().map(|(key, _)| *key).filter(|(_, h)| *h > height).collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub fn clear_all(&self) {
        self.checkpoint_cache.write().clear();
        *self.stats.write() = CacheStats::default();
        log::debug!("checkpoint cache cleared");
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn len(&self) -> usize {
        self.checkpoint_cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoint_cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_hits_and_misses() {
        let cache = CacheManager::new(CacheConfig::default());
        assert_eq!(cache.get_checkpoint(Denomination::Ten, 5), None);

        cache.put_checkpoint(Denomination::Ten, 5, AccumulatorValue([1u8; 32]));
        assert_eq!(cache.get_checkpoint(Denomination::Ten, 5), Some(AccumulatorValue([1u8; 32])));

        let stats = cache.get_stats();
        assert_eq!(stats.checkpoint_hits, 1);
        assert_eq!(stats.checkpoint_misses, 1);
        assert!((stats.checkpoint_hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = CacheManager::new(CacheConfig {
            checkpoint_cache_size: 2,
            enable_stats: false,
        });
        for height in 1..=3 {
            cache.put_checkpoint(Denomination::One, height, AccumulatorValue([height as u8; 32]));
        }
        assert_eq!(cache.get_checkpoint(Denomination::One, 1), None);
        assert!(cache.get_checkpoint(Denomination::One, 3).is_some());
        assert_eq!(cache.get_stats().checkpoint_misses, 0);
    }

    #[test]
    fn test_invalidation() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.put_checkpoint(Denomination::Ten, 1, AccumulatorValue([1u8; 32]));
        cache.put_checkpoint(Denomination::Ten, 2, AccumulatorValue([2u8; 32]));
        cache.put_checkpoint(Denomination::Fifty, 2, AccumulatorValue([3u8; 32]));

        cache.invalidate_above(1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_checkpoint(Denomination::Ten, 1).is_some());
        assert_eq!(cache.get_checkpoint(Denomination::Fifty, 2), None);

        cache.clear_all();
        assert!(cache.is_empty());
        assert_eq!(cache.get_stats().checkpoint_hits, 0);
    }
}
