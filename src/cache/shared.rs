//! Shared cache handles.
//!
//! A controller owns its cache behind an async `RwLock`. The memory governor
//! never sees the concrete item type: it talks to caches through the
//! object-safe [`ManagedCache`] trait and only ever uses the cache's own API.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Duration;

use crate::cache::entry::{Origin, Page, Record};
use crate::cache::manager::{CacheStats, PageCache};

/// Thread-safe page cache.
pub type SharedPageCache<T> = Arc<RwLock<PageCache<T>>>;

/// Create a new thread-safe page cache.
pub fn new_shared_cache<T: Record>(max_size: usize) -> SharedPageCache<T> {
    Arc::new(RwLock::new(PageCache::new(max_size)))
}

/// The operations the memory governor may perform on a registered cache.
#[async_trait]
pub trait ManagedCache: Send + Sync {
    async fn stats(&self) -> CacheStats;

    /// Evict entries idle for longer than `max_age`.
    async fn evict_older_than(&self, max_age: Duration) -> Vec<Page>;

    /// Multiply the capacity by `factor`, evicting LRU entries beyond it.
    async fn scale_capacity(&self, factor: f64) -> Vec<Page>;

    /// Drop every entry with the given origin.
    async fn remove_origin(&self, origin: Origin) -> Vec<Page>;

    async fn clear(&self);
}

#[async_trait]
impl<T: Record> ManagedCache for RwLock<PageCache<T>> {
    async fn stats(&self) -> CacheStats {
        self.read().await.stats()
    }

    async fn evict_older_than(&self, max_age: Duration) -> Vec<Page> {
        self.write().await.evict_older_than(max_age)
    }

    async fn scale_capacity(&self, factor: f64) -> Vec<Page> {
        let mut cache = self.write().await;
        let scaled = (cache.max_size() as f64 * factor).floor() as usize;
        cache.set_max_size(scaled)
    }

    async fn remove_origin(&self, origin: Origin) -> Vec<Page> {
        self.write().await.remove_origin(origin)
    }

    async fn clear(&self) {
        self.write().await.clear()
    }
}
