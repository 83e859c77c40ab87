//! Conversation acceleration cache.
//!
//! Memoizes the selector's method decision per message *shape*. The
//! signature hashes a normalized shape (length bucket, category, first
//! word, closing character), not the content, so messages that differ only
//! in slot values collide on purpose.
//!
//! A [`ConversationCache`] is owned by exactly one conversation and needs no
//! locking. The optional [`PlatformCache`] is the one shared structure; it
//! is read on a local miss and written only by an explicit
//! [`PlatformCache::merge_from`].

mod platform;

pub use platform::{PlatformCache, PlatformEntry};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec::Method;
use crate::config::{CacheConfig, EvictionPolicy};
use crate::template::categorize;

/// Compute the shape signature of a message.
///
/// Layout: `[32 bits length bucket][32 bits CRC32 of the shape]`.
pub fn signature(text: &str) -> u64 {
    let bucket = length_bucket(text.len());
    let first_word = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    let last_char = text.chars().last().unwrap_or('\0');

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(categorize(text).as_bytes());
    hasher.update(&[0]);
    hasher.update(first_word.as_bytes());
    hasher.update(&[0]);
    hasher.update(last_char.encode_utf8(&mut [0u8; 4]).as_bytes());
    hasher.update(&bucket.to_be_bytes());

    (u64::from(bucket) << 32) | u64::from(hasher.finalize())
}

/// Power-of-two length bucket: 0 for empty, else ceil(log2(len + 1)).
fn length_bucket(len: usize) -> u32 {
    usize::BITS - len.leading_zeros()
}

/// A cached method decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Shape signature
    pub signature: u64,
    /// Winning method
    pub method: Method,
    /// Winning template, for Method::Template
    pub template_id: Option<u32>,
    /// Last hit or insert
    pub last_used: DateTime<Utc>,
    /// Hits since insert (scaled down by decay)
    pub hit_count: u32,
    /// Hits since the decision was last fully re-derived
    pub hits_since_validation: u32,
    #[serde(skip)]
    tick: u64,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Local hits
    pub hits: u64,
    /// Misses (local and platform)
    pub misses: u64,
    /// Hits served from the platform cache
    pub platform_hits: u64,
    /// Entries evicted at capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit (local or platform)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.platform_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

type OrderKey = (u64, u64, u64);

/// Bounded per-conversation decision cache
#[derive(Debug)]
pub struct ConversationCache {
    capacity: usize,
    policy: EvictionPolicy,
    entries: HashMap<u64, CacheEntry>,
    order: BTreeSet<OrderKey>,
    tick: u64,
    stats: CacheStats,
    platform: Option<Arc<PlatformCache>>,
}

impl ConversationCache {
    /// Create an empty cache
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: BTreeSet::new(),
            tick: 0,
            stats: CacheStats::default(),
            platform: None,
        }
    }

    /// Create from config
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.eviction)
    }

    /// Consult `platform` on local misses
    pub fn with_platform(mut self, platform: Arc<PlatformCache>) -> Self {
        self.platform = Some(platform);
        self
    }

    fn order_key(&self, entry: &CacheEntry) -> OrderKey {
        match self.policy {
            EvictionPolicy::Lru => (entry.tick, 0, entry.signature),
            EvictionPolicy::HitCount => (u64::from(entry.hit_count), entry.tick, entry.signature),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up a decision, recording the hit.
    ///
    /// On a local miss the platform cache (if attached) is consulted and a
    /// platform hit is copied into this cache.
    pub fn get(&mut self, signature: u64) -> Option<CacheEntry> {
        if let Some(mut entry) = self.entries.get(&signature).copied() {
            let old_key = self.order_key(&entry);
            entry.hit_count = entry.hit_count.saturating_add(1);
            entry.hits_since_validation = entry.hits_since_validation.saturating_add(1);
            entry.last_used = Utc::now();
            entry.tick = self.next_tick();

            let new_key = self.order_key(&entry);
            self.order.remove(&old_key);
            self.order.insert(new_key);
            self.entries.insert(signature, entry);
            self.stats.hits += 1;
            return Some(entry);
        }

        let shared = self.platform.as_ref().and_then(|p| p.get(signature));
        match shared {
            Some(shared) => {
                self.stats.platform_hits += 1;
                tracing::debug!(signature, method = %shared.method, "Platform cache hit");
                self.put(signature, shared.method, shared.template_id);
                self.entries.get(&signature).copied()
            },
            None => {
                self.stats.misses += 1;
                None
            },
        }
    }

    /// Look up without recording a hit
    pub fn peek(&self, signature: u64) -> Option<&CacheEntry> {
        self.entries.get(&signature)
    }

    /// Insert or replace a decision. Resets the revalidation counter.
    pub fn put(&mut self, signature: u64, method: Method, template_id: Option<u32>) {
        let tick = self.next_tick();
        let entry = match self.entries.get(&signature).copied() {
            Some(old) => {
                let old_key = self.order_key(&old);
                self.order.remove(&old_key);
                CacheEntry {
                    method,
                    template_id,
                    last_used: Utc::now(),
                    hits_since_validation: 0,
                    tick,
                    ..old
                }
            },
            None => CacheEntry {
                signature,
                method,
                template_id,
                last_used: Utc::now(),
                hit_count: 0,
                hits_since_validation: 0,
                tick,
            },
        };
        let key = self.order_key(&entry);
        self.order.insert(key);
        self.entries.insert(signature, entry);

        while self.entries.len() > self.capacity {
            if !self.evict_one(signature) {
                break;
            }
        }
    }

    /// Evict the lowest-ordered entry other than `keep`.
    fn evict_one(&mut self, keep: u64) -> bool {
        let victim = self.order.iter().find(|k| k.2 != keep).copied();
        let Some(key) = victim else {
            return false;
        };
        self.order.remove(&key);
        self.entries.remove(&key.2);
        self.stats.evictions += 1;
        true
    }

    /// Mark a decision as freshly re-derived
    pub fn mark_validated(&mut self, signature: u64) {
        if let Some(entry) = self.entries.get_mut(&signature) {
            entry.hits_since_validation = 0;
        }
    }

    /// Drop a stale decision
    pub fn invalidate(&mut self, signature: u64) -> Option<CacheEntry> {
        let entry = self.entries.remove(&signature)?;
        let key = self.order_key(&entry);
        self.order.remove(&key);
        Some(entry)
    }

    /// Scale every hit count by `factor` (0.0-1.0). Under the hit-count
    /// policy this lets old favourites age out.
    pub fn apply_decay(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        for entry in self.entries.values_mut() {
            entry.hit_count = (f64::from(entry.hit_count) * factor) as u32;
        }
        let keys: BTreeSet<OrderKey> = self.entries.values().map(|e| self.order_key(e)).collect();
        self.order = keys;
    }

    /// Entries in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Hit rate over all lookups
    pub fn hit_rate(&self) -> f64 {
        self.stats.hit_rate()
    }

    /// Drop all entries (counters are kept)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
