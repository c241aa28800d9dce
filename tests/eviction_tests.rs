//! Integration tests for memory-pressure eviction.

use std::sync::Arc;
use std::time::Duration;

use preload_pager::cache::{new_shared_cache, ManagedCache, Origin, SharedPageCache};
use preload_pager::config::{MemoryConfig, MemoryThresholds};
use preload_pager::memory::{CleanupStrategy, MemoryGovernor, PressureLevel};

/// Thresholds that put any non-empty cache at `level`.
fn config_at(level: PressureLevel) -> MemoryConfig {
    let thresholds = match level {
        PressureLevel::Low => MemoryThresholds::default(),
        PressureLevel::Medium => MemoryThresholds {
            low: 0.0,
            medium: 1.0,
            high: 2.0,
            critical: 3.0,
        },
        PressureLevel::High => MemoryThresholds {
            low: 0.0,
            medium: 0.0,
            high: 1.0,
            critical: 2.0,
        },
        PressureLevel::Critical => MemoryThresholds {
            low: 0.0,
            medium: 0.0,
            high: 0.0,
            critical: 0.0,
        },
    };
    MemoryConfig {
        thresholds,
        capacity_scale: 0.5,
        ..Default::default()
    }
}

/// Eight pages: odd ones loaded, even ones preloaded.
async fn filled_cache() -> SharedPageCache<String> {
    let cache = new_shared_cache(8);
    {
        let mut guard = cache.write().await;
        for page in 1..=8 {
            let origin = if page % 2 == 0 {
                Origin::Preloaded
            } else {
                Origin::Loaded
            };
            guard.set(page, vec![format!("guest-{page}"); 10], origin);
        }
    }
    cache
}

#[tokio::test]
async fn test_high_pressure_runs_one_strategy_per_check() {
    let governor = MemoryGovernor::new(config_at(PressureLevel::High));
    let cache = filled_cache().await;
    governor
        .register_cache_manager("guests", cache.clone())
        .await;

    let check = governor.check_pressure().await;
    assert_eq!(check.snapshot.pressure, PressureLevel::High);
    let cleanup = check.cleanup.unwrap();
    assert_eq!(cleanup.strategy, CleanupStrategy::ReduceCacheSize);
    assert_eq!(cleanup.pages_evicted, 4);

    // Only the capacity was reduced; preloaded pages survive this check.
    let guard = cache.read().await;
    assert_eq!(guard.max_size(), 4);
    assert_eq!(guard.pages(), vec![5, 6, 7, 8]);
}

#[tokio::test]
async fn test_repeated_pressure_escalates() {
    let governor = MemoryGovernor::new(config_at(PressureLevel::High));
    let cache = filled_cache().await;
    governor
        .register_cache_manager("guests", cache.clone())
        .await;

    let first = governor.check_pressure().await.cleanup.unwrap();
    let second = governor.check_pressure().await.cleanup.unwrap();
    assert_eq!(first.strategy, CleanupStrategy::ReduceCacheSize);
    assert_eq!(second.strategy, CleanupStrategy::ClearPreloaded);
    assert_eq!(second.pages_evicted, 2);
    assert_eq!(cache.read().await.pages(), vec![5, 7]);

    // Wraps back to the first high-pressure strategy.
    let third = governor.check_pressure().await.cleanup.unwrap();
    assert_eq!(third.strategy, CleanupStrategy::ReduceCacheSize);
}

#[tokio::test(start_paused = true)]
async fn test_medium_pressure_drops_idle_entries() {
    let governor = MemoryGovernor::new(config_at(PressureLevel::Medium));
    let cache = filled_cache().await;
    governor
        .register_cache_manager("guests", cache.clone())
        .await;

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    cache.write().await.get(3);

    let cleanup = governor.check_pressure().await.cleanup.unwrap();
    assert_eq!(cleanup.strategy, CleanupStrategy::ClearOldEntries);
    assert_eq!(cleanup.pages_evicted, 7);
    assert_eq!(cache.read().await.pages(), vec![3]);
}

#[tokio::test]
async fn test_low_pressure_leaves_caches_alone() {
    let governor = MemoryGovernor::new(config_at(PressureLevel::Low));
    let cache = filled_cache().await;
    governor
        .register_cache_manager("guests", cache.clone())
        .await;

    let check = governor.check_pressure().await;
    assert_eq!(check.snapshot.pressure, PressureLevel::Low);
    assert!(check.cleanup.is_none());
    assert_eq!(check.snapshot.cache_entry_count, 8);
    assert_eq!(cache.read().await.len(), 8);
    assert_eq!(governor.history().await.len(), 1);
}

#[tokio::test]
async fn test_cleanup_spans_every_registered_cache() {
    let governor = MemoryGovernor::new(config_at(PressureLevel::Critical));
    let guests = filled_cache().await;
    let rooms = filled_cache().await;
    governor.register_cache_manager("guests", guests.clone()).await;
    governor.register_cache_manager("rooms", rooms.clone()).await;
    assert_eq!(governor.registered().await, vec!["guests", "rooms"]);

    // No GC hook: the first critical check is a no-op that still succeeds.
    let gc = governor.check_pressure().await.cleanup.unwrap();
    assert_eq!(gc.strategy, CleanupStrategy::ForceGc);
    assert!(gc.succeeded());

    let clear = governor.check_pressure().await.cleanup.unwrap();
    assert_eq!(clear.strategy, CleanupStrategy::ClearAll);
    assert_eq!(clear.pages_evicted, 16);
    assert!(guests.read().await.is_empty());
    assert!(rooms.read().await.is_empty());
}

#[tokio::test]
async fn test_unregistered_cache_is_untouched() {
    let governor = MemoryGovernor::new(config_at(PressureLevel::Critical));
    let cache = filled_cache().await;
    let managed: Arc<dyn ManagedCache> = cache.clone();
    governor.register_cache_manager("guests", managed).await;
    assert!(governor.unregister_cache_manager("guests").await);
    assert!(!governor.unregister_cache_manager("guests").await);

    governor.check_pressure().await;
    governor.check_pressure().await;
    assert_eq!(cache.read().await.len(), 8);
}
