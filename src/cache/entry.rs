//! Cache entry types.
//!
//! An entry holds the items of a single page together with the access
//! bookkeeping the LRU policy and the memory governor rely on. Entries are the
//! unit of eviction: a page is cached, promoted, and dropped as a whole.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// 1-indexed page number.
pub type Page = u32;

/// Anything the cache can hold.
///
/// Records are opaque to the cache; `Serialize` is only used to derive the
/// size proxy behind the memory estimate.
pub trait Record: Clone + Serialize + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Serialize + Send + Sync + 'static {}

/// How a page made it into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Fetched because the user asked for it.
    Loaded,
    /// Fetched speculatively ahead of a request.
    Preloaded,
}

impl Origin {
    /// Combine an existing origin with a new write. `Loaded` is sticky.
    pub fn merge(self, incoming: Origin) -> Origin {
        match (self, incoming) {
            (Origin::Loaded, _) | (_, Origin::Loaded) => Origin::Loaded,
            _ => Origin::Preloaded,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Loaded => write!(f, "loaded"),
            Origin::Preloaded => write!(f, "preloaded"),
        }
    }
}

/// A single cached page.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Page number this entry covers.
    pub page: Page,

    /// Items of the page, in server order.
    pub items: Vec<T>,

    /// Direct load or speculative prefetch.
    pub origin: Origin,

    /// When the entry was inserted.
    pub created_at: Instant,

    /// Timestamp of last access.
    pub last_accessed_at: Instant,

    /// Number of times this entry has been read or written.
    pub access_count: u64,

    /// Serialized-size proxy, computed once at insertion.
    pub estimated_bytes: usize,

    /// Logical access clock; orders entries whose timestamps collide.
    pub(crate) access_tick: u64,
}

impl<T: Record> CacheEntry<T> {
    /// Create a new entry stamped with the given access tick.
    pub fn new(page: Page, items: Vec<T>, origin: Origin, tick: u64) -> Self {
        let now = Instant::now();
        let estimated_bytes = estimate_bytes(&items);
        Self {
            page,
            items,
            origin,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            estimated_bytes,
            access_tick: tick,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Record an access, updating timestamp and counter.
    pub fn touch(&mut self, tick: u64) {
        self.last_accessed_at = Instant::now();
        self.access_count += 1;
        self.access_tick = tick;
    }

    /// Time since the last access, relative to `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed_at)
    }

    pub fn is_preloaded(&self) -> bool {
        self.origin == Origin::Preloaded
    }
}

/// Rough byte size of a page: the length of its JSON encoding.
///
/// Falls back to the in-memory size of the slice if the items refuse to
/// serialize, so the estimate is always available.
pub fn estimate_bytes<T: serde::Serialize>(items: &[T]) -> usize {
    serde_json::to_vec(items)
        .map(|encoded| encoded.len())
        .unwrap_or_else(|_| std::mem::size_of_val(items))
}
