//! Platform-wide decision cache.
//!
//! Shared by every conversation in the process. Reads go through a sharded
//! [`DashMap`], so a lookup only locks one shard. Writes happen only in
//! [`PlatformCache::merge_from`], which callers run off the hot path (for
//! example when a conversation ends, or on a timer).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::ConversationCache;
use crate::codec::Method;
use crate::config::CacheConfig;

/// A merged decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformEntry {
    /// Winning method
    pub method: Method,
    /// Winning template, for Method::Template
    pub template_id: Option<u32>,
    /// Hits accumulated across merged conversations
    pub hit_count: u64,
    /// Last merge that touched this entry
    pub last_merged: DateTime<Utc>,
}

/// Sharded, read-mostly cache shared across conversations
#[derive(Debug)]
pub struct PlatformCache {
    entries: DashMap<u64, PlatformEntry>,
    capacity: usize,
    merges: AtomicU64,
    evictions: AtomicU64,
}

impl PlatformCache {
    /// Create an empty cache
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            merges: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Shared cache sized from config, or `None` when `platform_enabled`
    /// is off
    pub fn from_config(config: &CacheConfig) -> Option<Arc<Self>> {
        config
            .platform_enabled
            .then(|| Arc::new(Self::new(config.platform_capacity)))
    }

    /// Look up a decision
    pub fn get(&self, signature: u64) -> Option<PlatformEntry> {
        self.entries.get(&signature).map(|e| *e.value())
    }

    /// Fold a conversation's decisions in. Returns the number of entries
    /// touched.
    ///
    /// Hit counts accumulate. When two conversations disagree on the method
    /// for a signature, the one with more local hits wins.
    pub fn merge_from(&self, cache: &ConversationCache) -> usize {
        let now = Utc::now();
        let mut touched = 0;

        for local in cache.entries() {
            let hits = u64::from(local.hit_count);
            self.entries
                .entry(local.signature)
                .and_modify(|shared| {
                    if hits > shared.hit_count {
                        shared.method = local.method;
                        shared.template_id = local.template_id;
                    }
                    shared.hit_count = shared.hit_count.saturating_add(hits);
                    shared.last_merged = now;
                })
                .or_insert(PlatformEntry {
                    method: local.method,
                    template_id: local.template_id,
                    hit_count: hits,
                    last_merged: now,
                });
            touched += 1;
        }

        self.merges.fetch_add(1, Ordering::Relaxed);
        self.shrink_to_capacity();
        tracing::debug!(touched, size = self.entries.len(), "Merged conversation cache");
        touched
    }

    /// Evict lowest-hit entries until within capacity.
    fn shrink_to_capacity(&self) {
        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut ranked: Vec<(u64, DateTime<Utc>, u64)> = self
            .entries
            .iter()
            .map(|e| (e.value().hit_count, e.value().last_merged, *e.key()))
            .collect();
        ranked.sort_unstable();
        for (_, _, signature) in ranked.into_iter().take(excess) {
            self.entries.remove(&signature);
        }
        self.evictions.fetch_add(excess as u64, Ordering::Relaxed);
    }

    /// Drop a decision known to be stale everywhere
    pub fn invalidate(&self, signature: u64) {
        self.entries.remove(&signature);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Completed merges
    pub fn merge_count(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    /// Entries evicted at capacity
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionPolicy;

    fn local_with(entries: &[(u64, Method, Option<u32>, usize)]) -> ConversationCache {
        let mut cache = ConversationCache::new(64, EvictionPolicy::Lru);
        for (sig, method, id, hits) in entries {
            cache.put(*sig, *method, *id);
            for _ in 0..*hits {
                cache.get(*sig);
            }
        }
        cache
    }

    #[test]
    fn test_from_config() {
        let mut config = CacheConfig::default();
        assert!(PlatformCache::from_config(&config).is_none());

        config.platform_enabled = true;
        config.platform_capacity = 2;
        let platform = PlatformCache::from_config(&config).unwrap();
        platform.merge_from(&local_with(&[
            (1, Method::Template, Some(20), 3),
            (2, Method::Dictionary, None, 2),
            (3, Method::Fallback, None, 1),
        ]));
        assert_eq!(platform.len(), 2);
        assert!(platform.get(3).is_none());
    }

    #[test]
    fn test_merge_accumulates() {
        let platform = PlatformCache::new(16);
        platform.merge_from(&local_with(&[(1, Method::Template, Some(20), 2)]));
        platform.merge_from(&local_with(&[(1, Method::Template, Some(20), 3)]));

        let entry = platform.get(1).unwrap();
        assert_eq!(entry.hit_count, 5);
        assert_eq!(platform.merge_count(), 2);
    }

    #[test]
    fn test_merge_conflict_prefers_more_hits() {
        let platform = PlatformCache::new(16);
        platform.merge_from(&local_with(&[(1, Method::Template, Some(20), 1)]));
        platform.merge_from(&local_with(&[(1, Method::Dictionary, None, 4)]));
        assert_eq!(platform.get(1).unwrap().method, Method::Dictionary);
    }

    #[test]
    fn test_capacity() {
        let platform = PlatformCache::new(2);
        platform.merge_from(&local_with(&[
            (1, Method::Dictionary, None, 5),
            (2, Method::Dictionary, None, 0),
            (3, Method::Dictionary, None, 3),
        ]));
        assert_eq!(platform.len(), 2);
        assert!(platform.get(2).is_none());
        assert_eq!(platform.eviction_count(), 1);
    }

    #[test]
    fn test_concurrent_reads() {
        let platform = std::sync::Arc::new(PlatformCache::new(100));
        platform.merge_from(&local_with(&[(9, Method::Template, Some(22), 1)]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = platform.clone();
                std::thread::spawn(move || (0..1000).all(|_| p.get(9).is_some()))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
