//! Integration tests for the page cache.

use std::sync::Arc;
use std::time::Duration;

use preload_pager::cache::{new_shared_cache, ManagedCache, Origin, Page, PageCache};

fn guests(page: Page) -> Vec<String> {
    (0..10).map(|i| format!("guest-{page}-{i}")).collect()
}

#[test]
fn test_lru_lifecycle() {
    let mut cache = PageCache::new(3);

    for page in 1..=3 {
        assert_eq!(cache.set(page, guests(page), Origin::Loaded), None);
    }
    assert_eq!(cache.len(), 3);

    // Touch page 1 so page 2 becomes the least recently used.
    assert!(cache.get(1).is_some());

    let evicted = cache.set(4, guests(4), Origin::Loaded);
    assert_eq!(evicted, Some(2));
    assert_eq!(cache.pages(), vec![1, 3, 4]);
    assert_eq!(cache.access_order(), vec![4, 1, 3]);

    // Replacing an existing page never evicts.
    assert_eq!(cache.set(3, guests(3), Origin::Preloaded), None);
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_capacity_is_never_exceeded() {
    for capacity in [1, 2, 7] {
        let mut cache = PageCache::new(capacity);
        for page in 1..=20 {
            cache.set(page, guests(page), Origin::Preloaded);
            if page % 3 == 0 {
                cache.get(page / 3);
            }
            assert!(cache.len() <= capacity);
        }
        assert_eq!(cache.len(), capacity);
        assert!(cache.has(20));
    }
}

#[test]
fn test_hit_rate() {
    let mut cache = PageCache::new(5);
    cache.set(1, guests(1), Origin::Loaded);

    assert!(cache.get(1).is_some());
    assert!(cache.get(2).is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    assert!(stats.estimated_memory_bytes > 0);

    // Peeking is invisible to the counters.
    assert!(cache.peek(1).is_some());
    assert_eq!(cache.stats().hits, 1);

    cache.clear();
    let stats = cache.stats();
    assert_eq!((stats.size, stats.hits, stats.misses), (0, 0, 0));
    assert_eq!(stats.hit_rate, 0.0);
}

#[test]
fn test_loaded_origin_is_sticky() {
    let mut cache = PageCache::new(4);
    cache.set(1, guests(1), Origin::Loaded);
    cache.set(1, guests(1), Origin::Preloaded);
    assert_eq!(cache.peek(1).unwrap().origin, Origin::Loaded);

    cache.set(2, guests(2), Origin::Preloaded);
    assert!(cache.mark_loaded(2));
    assert!(!cache.mark_loaded(2));
    assert_eq!(cache.peek(2).unwrap().origin, Origin::Loaded);
}

#[test]
fn test_preload_candidates_skip_cached_pages() {
    let mut cache = PageCache::new(10);
    cache.set(1, guests(1), Origin::Loaded);
    cache.set(3, guests(3), Origin::Preloaded);

    assert_eq!(cache.preload_candidates(1, 3), vec![2, 4]);
    assert!(cache.preload_candidates(1, 0).is_empty());
}

#[test]
fn test_shrinking_capacity_evicts_lru_first() {
    let mut cache = PageCache::new(5);
    for page in 1..=5 {
        cache.set(page, guests(page), Origin::Loaded);
    }
    cache.get(1);

    let evicted = cache.set_max_size(2);
    assert_eq!(evicted, vec![2, 3, 4]);
    assert_eq!(cache.pages(), vec![1, 5]);
    assert_eq!(cache.max_size(), 2);
}

#[test]
fn test_remove_origin() {
    let mut cache = PageCache::new(5);
    cache.set(1, guests(1), Origin::Loaded);
    cache.set(2, guests(2), Origin::Preloaded);
    cache.set(3, guests(3), Origin::Preloaded);

    assert_eq!(cache.remove_origin(Origin::Preloaded), vec![2, 3]);
    assert_eq!(cache.pages(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_pages_are_evicted() {
    let mut cache = PageCache::new(5);
    cache.set(1, guests(1), Origin::Loaded);
    cache.set(2, guests(2), Origin::Loaded);

    tokio::time::advance(Duration::from_secs(200)).await;
    cache.get(2);
    tokio::time::advance(Duration::from_secs(200)).await;

    assert_eq!(cache.eviction_candidates(Duration::from_secs(300)), vec![1]);
    assert_eq!(cache.force_cleanup(), vec![1]);
    assert_eq!(cache.pages(), vec![2]);
}

#[tokio::test]
async fn test_shared_cache_as_managed() {
    let cache = new_shared_cache::<String>(4);
    {
        let mut guard = cache.write().await;
        guard.set(1, guests(1), Origin::Loaded);
        guard.set(2, guests(2), Origin::Preloaded);
    }

    let managed: Arc<dyn ManagedCache> = cache.clone();
    assert_eq!(managed.remove_origin(Origin::Preloaded).await, vec![2]);
    assert_eq!(managed.stats().await.size, 1);

    managed.clear().await;
    assert!(cache.read().await.is_empty());
}
