//! Eviction policy: decides which pages leave the cache.
//!
//! Strict LRU. Recency is ordered by the cache's logical access tick, which
//! advances on every touch, so entries touched within the same clock reading
//! still have a total order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::{Duration, Instant};

use crate::cache::entry::{CacheEntry, Page};

/// An eviction candidate ordered by recency.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub page: Page,
    pub last_accessed_at: Instant,
    access_tick: u64,
}

// Lower tick = older access = higher eviction priority (popped first from the max-heap).
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.access_tick == other.access_tick
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.access_tick.cmp(&self.access_tick)
    }
}

/// The LRU eviction engine.
#[derive(Debug, Default, Clone)]
pub struct Evictor;

impl Evictor {
    pub fn new() -> Self {
        Self
    }

    /// Select up to `count` pages to evict, least recently used first.
    pub fn select_victims<'a, T: 'a>(
        &self,
        entries: impl Iterator<Item = &'a CacheEntry<T>>,
        count: usize,
    ) -> Vec<Page> {
        if count == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<EvictionCandidate> = entries
            .map(|entry| EvictionCandidate {
                page: entry.page,
                last_accessed_at: entry.last_accessed_at,
                access_tick: entry.access_tick,
            })
            .collect();

        let mut victims = Vec::with_capacity(count.min(heap.len()));
        while victims.len() < count {
            match heap.pop() {
                Some(candidate) => victims.push(candidate.page),
                None => break,
            }
        }
        victims
    }

    /// The single least recently used page, if any.
    pub fn lru<'a, T: 'a>(&self, entries: impl Iterator<Item = &'a CacheEntry<T>>) -> Option<Page> {
        self.select_victims(entries, 1).into_iter().next()
    }

    /// Pages idle for longer than `max_age` as of `now`, ascending.
    pub fn idle_pages<'a, T: 'a>(
        &self,
        entries: impl Iterator<Item = &'a CacheEntry<T>>,
        max_age: Duration,
        now: Instant,
    ) -> Vec<Page> {
        let mut pages: Vec<Page> = entries
            .filter(|entry| entry.idle_for(now) > max_age)
            .map(|entry| entry.page)
            .collect();
        pages.sort_unstable();
        pages
    }
}
