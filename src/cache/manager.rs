//! Page cache manager: a page-keyed store with LRU replacement.
//!
//! The cache knows nothing about loading or errors. It:
//! - Stores one entry per page, tagged with its origin
//! - Evicts exactly one least-recently-used entry when a new page arrives at capacity
//! - Counts hits and misses for its lifetime (or since the last `clear`)
//! - Maintains a serialized-size memory estimate for the memory governor

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::cache::entry::{CacheEntry, Origin, Page, Record};
use crate::cache::evictor::Evictor;

/// Idle time after which an entry becomes an eviction candidate.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached pages.
    pub size: usize,
    /// Capacity in pages.
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 with no lookups.
    pub hit_rate: f64,
    /// Sum of the entries' size proxies.
    pub estimated_memory_bytes: usize,
}

/// The page cache.
#[derive(Debug)]
pub struct PageCache<T> {
    /// Entries indexed by page.
    entries: HashMap<Page, CacheEntry<T>>,

    /// Capacity in pages (always at least 1).
    max_size: usize,

    hits: u64,
    misses: u64,

    /// Logical access clock.
    clock: u64,

    /// Replacement policy.
    evictor: Evictor,
}

impl<T: Record> PageCache<T> {
    /// Create an empty cache holding at most `max_size` pages.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            hits: 0,
            misses: 0,
            clock: 0,
            evictor: Evictor::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a page, counting a hit or a miss and refreshing its recency.
    pub fn get(&mut self, page: Page) -> Option<&CacheEntry<T>> {
        let tick = self.tick();
        match self.entries.get_mut(&page) {
            Some(entry) => {
                entry.touch(tick);
                self.hits += 1;
                trace!(page, "cache hit");
                Some(&*entry)
            }
            None => {
                self.misses += 1;
                trace!(page, "cache miss");
                None
            }
        }
    }

    /// Read a page without touching counters or recency.
    pub fn peek(&self, page: Page) -> Option<&CacheEntry<T>> {
        self.entries.get(&page)
    }

    /// Insert or replace a page.
    ///
    /// A new page arriving at capacity evicts the least recently used entry
    /// first; the evicted page is returned. Replacing an existing page never
    /// evicts, and never downgrades a `Loaded` entry to `Preloaded`.
    pub fn set(&mut self, page: Page, items: Vec<T>, origin: Origin) -> Option<Page> {
        let tick = self.tick();

        if let Some(existing) = self.entries.get(&page) {
            let origin = existing.origin.merge(origin);
            let mut entry = CacheEntry::new(page, items, origin, tick);
            entry.created_at = existing.created_at;
            entry.access_count = existing.access_count + 1;
            self.entries.insert(page, entry);
            return None;
        }

        let evicted = if self.entries.len() >= self.max_size {
            let victim = self.evictor.lru(self.entries.values());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
                debug!(page = victim, incoming = page, "Evicted LRU page");
            }
            victim
        } else {
            None
        };

        self.entries
            .insert(page, CacheEntry::new(page, items, origin, tick));
        evicted
    }

    pub fn has(&self, page: Page) -> bool {
        self.entries.contains_key(&page)
    }

    /// Remove a page. Returns the removed entry.
    pub fn delete(&mut self, page: Page) -> Option<CacheEntry<T>> {
        self.entries.remove(&page)
    }

    /// Drop every entry and reset the hit/miss counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Promote a page to `Loaded`. Returns true if the origin changed.
    pub fn mark_loaded(&mut self, page: Page) -> bool {
        match self.entries.get_mut(&page) {
            Some(entry) if entry.origin == Origin::Preloaded => {
                entry.origin = Origin::Loaded;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Change the capacity. Shrinking evicts through the LRU path until the
    /// cache fits; the evicted pages are returned, oldest first.
    pub fn set_max_size(&mut self, max_size: usize) -> Vec<Page> {
        self.max_size = max_size.max(1);
        let excess = self.entries.len().saturating_sub(self.max_size);
        let victims = self.evictor.select_victims(self.entries.values(), excess);
        for page in &victims {
            self.entries.remove(page);
        }
        if !victims.is_empty() {
            debug!(
                evicted = victims.len(),
                max_size = self.max_size,
                "Shrunk cache capacity"
            );
        }
        victims
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let hit_rate = if lookups > 0 {
            self.hits as f64 / lookups as f64
        } else {
            0.0
        };

        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            estimated_memory_bytes: self.memory_usage(),
        }
    }

    /// Estimated size of all cached pages in bytes.
    pub fn memory_usage(&self) -> usize {
        self.entries.values().map(|e| e.estimated_bytes).sum()
    }

    /// The next `count` pages after `current_page` that are not cached yet.
    pub fn preload_candidates(&self, current_page: Page, count: usize) -> Vec<Page> {
        (1..=count as Page)
            .filter_map(|offset| current_page.checked_add(offset))
            .filter(|page| !self.has(*page))
            .collect()
    }

    /// Pages idle for longer than `max_age`. Nothing is evicted.
    pub fn eviction_candidates(&self, max_age: Duration) -> Vec<Page> {
        self.evictor
            .idle_pages(self.entries.values(), max_age, Instant::now())
    }

    /// Evict every page idle for longer than `max_age`.
    pub fn evict_older_than(&mut self, max_age: Duration) -> Vec<Page> {
        let victims = self.eviction_candidates(max_age);
        for page in &victims {
            self.entries.remove(page);
        }
        victims
    }

    /// Evict pages idle for longer than the default five minutes.
    pub fn force_cleanup(&mut self) -> Vec<Page> {
        self.evict_older_than(DEFAULT_MAX_IDLE)
    }

    /// Remove every entry with the given origin.
    pub fn remove_origin(&mut self, origin: Origin) -> Vec<Page> {
        let mut removed: Vec<Page> = self
            .entries
            .values()
            .filter(|entry| entry.origin == origin)
            .map(|entry| entry.page)
            .collect();
        removed.sort_unstable();
        for page in &removed {
            self.entries.remove(page);
        }
        removed
    }

    /// Seed the cache with pages loaded elsewhere.
    pub fn warm_up(&mut self, pages: impl IntoIterator<Item = (Page, Vec<T>)>) {
        for (page, items) in pages {
            self.set(page, items, Origin::Loaded);
        }
    }

    /// Cached pages, most recently used first.
    pub fn access_order(&self) -> Vec<Page> {
        let mut order: Vec<&CacheEntry<T>> = self.entries.values().collect();
        order.sort_by(|a, b| b.access_tick.cmp(&a.access_tick));
        order.into_iter().map(|entry| entry.page).collect()
    }

    /// Cached pages in ascending order.
    pub fn pages(&self) -> Vec<Page> {
        let mut pages: Vec<Page> = self.entries.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Hit rate above 30% and less than 1 MiB cached.
    pub fn is_healthy(&self) -> bool {
        let stats = self.stats();
        stats.hit_rate > 0.3 && stats.estimated_memory_bytes < 1024 * 1024
    }
}
