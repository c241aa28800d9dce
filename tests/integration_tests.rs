//! Integration tests for the full pagination pipeline.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use preload_pager::analytics::AnalyticsAggregator;
use preload_pager::cache::Page;
use preload_pager::config::{AnalyticsConfig, MemoryConfig, MemoryThresholds, PaginationConfig};
use preload_pager::memory::{CleanupStrategy, MemoryGovernor};
use preload_pager::pagination::{DataSource, PageResult, PaginationController, Phase};
use preload_pager::retry::ErrorKind;

/// Numbered records with optional latency and scripted failures.
struct MockSource {
    total_items: u64,
    latency: Duration,
    /// Fail this many calls before succeeding; `u32::MAX` never succeeds.
    failures: AtomicU32,
    /// This page always fails, independent of `failures`.
    broken_page: Option<Page>,
    calls: AtomicU32,
    requested: Mutex<Vec<Page>>,
}

impl MockSource {
    fn new(total_items: u64) -> Self {
        Self {
            total_items,
            latency: Duration::ZERO,
            failures: AtomicU32::new(0),
            broken_page: None,
            calls: AtomicU32::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn failing(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    fn broken_page(mut self, page: Page) -> Self {
        self.broken_page = Some(page);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn requested(&self) -> Vec<Page> {
        self.requested.lock().unwrap().clone()
    }

    fn fetches_of(&self, page: Page) -> usize {
        self.requested().iter().filter(|p| **p == page).count()
    }
}

#[async_trait]
impl DataSource<u64> for MockSource {
    async fn fetch_page(
        &self,
        page: Page,
        items_per_page: u32,
    ) -> anyhow::Result<PageResult<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(page);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.broken_page == Some(page) {
            anyhow::bail!("Network error on page {page}");
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures.store(remaining - 1, Ordering::SeqCst);
            }
            anyhow::bail!("Network error");
        }

        let start = u64::from(page - 1) * u64::from(items_per_page);
        let end = (start + u64::from(items_per_page)).min(self.total_items);
        Ok(PageResult {
            items: (start..end).collect(),
            total_items: self.total_items,
            total_pages: 0,
        })
    }
}

fn config() -> PaginationConfig {
    PaginationConfig {
        items_per_page: 10,
        preload_pages: 2,
        cache_size: 10,
        background_preload: false,
        preload_delay_ms: 0,
    }
}

fn controller(source: &Arc<MockSource>) -> PaginationController<u64> {
    PaginationController::<u64>::new(source.clone(), config())
}

#[tokio::test]
async fn test_initial_load_and_prefetch() {
    let source = Arc::new(MockSource::new(25));
    let controller = controller(&source);

    controller.init().await.unwrap();
    assert_eq!(controller.preload_next().await, 2);

    let state = controller.state().await;
    assert_eq!(state.total_pages, 3);
    assert_eq!(state.loaded_pages, BTreeSet::from([1]));
    assert_eq!(state.preloaded_pages, BTreeSet::from([2, 3]));
    assert_eq!(state.phase, Phase::Idle);
    assert!(controller.is_page_preloaded(2).await);
    assert_eq!(source.requested(), vec![1, 2, 3]);

    // Nothing left to prefetch.
    assert_eq!(controller.preload_next().await, 0);

    // Landing on a prefetched page is a hit that promotes it.
    controller.go_to_page(3).await.unwrap();
    assert_eq!(source.calls(), 3);
    assert!(controller.is_page_loaded(3).await);
    assert_eq!(controller.current_items().await, (20..25).collect::<Vec<u64>>());

    let info = controller.info();
    assert_eq!((info.start_index, info.end_index, info.showing_items), (20, 25, 5));
    assert!(!info.has_next_page);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_retries_then_surfaces() {
    let source = Arc::new(MockSource::new(100).failing(u32::MAX));
    let controller = controller(&source);

    let failure = controller.init().await.unwrap_err();
    assert_eq!(source.calls(), 4);
    assert_eq!(failure.page, 1);
    assert_eq!(failure.kind, ErrorKind::Network);
    assert_eq!(failure.retry_count, 3);

    let state = controller.state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(state.retry_count, 3);
    assert_eq!(state.error, Some(failure.clone()));

    let record = controller.errors().get(&failure.error_id.unwrap()).await.unwrap();
    assert!(record.is_exhausted());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers() {
    let source = Arc::new(MockSource::new(100).failing(2));
    let analytics = AnalyticsAggregator::new(AnalyticsConfig::default());
    let controller = PaginationController::<u64>::builder(source.clone())
        .config(config())
        .analytics(analytics.clone())
        .build();

    controller.init().await.unwrap();
    assert_eq!(source.calls(), 3);

    let state = controller.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.retry_count, 0);
    assert!(state.error.is_none());
    assert!(controller.errors().unresolved().await.is_empty());

    let metrics = analytics.metrics().await;
    assert_eq!(metrics.errors.load_errors, 2);
    assert_eq!(metrics.interactions.error_retries, 2);
    assert_eq!(metrics.load_times.page_loads, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_fetch() {
    let source = Arc::new(MockSource::new(30).with_latency(Duration::from_millis(100)));
    let controller = controller(&source);
    controller.init().await.unwrap();

    let (preloaded, navigated) =
        tokio::join!(controller.preload_page(2), controller.go_to_page(2));
    assert!(preloaded);
    navigated.unwrap();

    assert_eq!(source.requested(), vec![1, 2]);
    assert!(controller.is_page_loaded(2).await);
    assert!(!controller.is_page_preloaded(2).await);
}

#[tokio::test(start_paused = true)]
async fn test_invalidated_prefetch_is_discarded() {
    let source = Arc::new(MockSource::new(30).with_latency(Duration::from_millis(100)));
    let controller = controller(&source);
    controller.init().await.unwrap();

    let background = controller.clone();
    let prefetch = tokio::spawn(async move { background.preload_page(2).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.phase(), Phase::Preloading);

    controller.clear_cache().await;
    assert!(!prefetch.await.unwrap());

    assert_eq!(controller.cache_stats().await.size, 0);
    assert_eq!(controller.prefetch_stats().discarded, 1);
    assert_eq!(controller.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_a_failing_page_stops_its_retries() {
    let source = Arc::new(MockSource::new(50).broken_page(2));
    let controller = controller(&source);
    controller.init().await.unwrap();

    let reader = controller.clone();
    let failing = tokio::spawn(async move { reader.go_to_page(2).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.phase(), Phase::Loading);

    // Back to a cached page while page 2 waits for its first retry.
    controller.go_to_page(1).await.unwrap();
    failing.await.unwrap().unwrap();

    let state = controller.state().await;
    assert_eq!(state.current_page, 1);
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.error.is_none());
    assert_eq!(state.retry_count, 0);
    assert_eq!(source.fetches_of(2), 1);
    assert!(controller.errors().unresolved().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_refresh_keeps_retrying_off_page() {
    let source = Arc::new(MockSource::new(50).broken_page(2));
    let controller = controller(&source);
    controller.init().await.unwrap();

    let failure = controller.refresh_page(2).await.unwrap_err();
    assert_eq!(failure.page, 2);
    assert_eq!(source.fetches_of(2), 4);
    assert_eq!(controller.current_page(), 1);
    assert_eq!(controller.phase(), Phase::Error);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_does_not_stall_fetch() {
    let source = Arc::new(MockSource::new(30).with_latency(Duration::from_millis(100)));
    let controller = controller(&source);
    controller.init().await.unwrap();

    let background = controller.clone();
    let prefetch = tokio::spawn(async move { background.preload_page(2).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    prefetch.abort();
    assert!(prefetch.await.unwrap_err().is_cancelled());

    // The fetch finishes on its own and the cache stays usable.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.phase(), Phase::Idle);
    assert!(controller.is_page_preloaded(2).await);
    assert_eq!(controller.cache_stats().await.size, 2);

    controller.go_to_page(2).await.unwrap();
    assert_eq!(source.calls(), 2);
    assert!(controller.is_page_loaded(2).await);
}

#[tokio::test]
async fn test_prefetch_failure_stays_out_of_view() {
    let source = Arc::new(MockSource::new(30).broken_page(2));
    let analytics = AnalyticsAggregator::new(AnalyticsConfig::default());
    let controller = PaginationController::<u64>::builder(source.clone())
        .config(config())
        .analytics(analytics.clone())
        .build();

    controller.init().await.unwrap();
    assert_eq!(controller.preload_next().await, 1);

    let state = controller.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.error.is_none());
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.preloaded_pages, BTreeSet::from([3]));
    assert_eq!(source.fetches_of(2), 1);
    assert_eq!(controller.prefetch_stats().failed, 1);

    let metrics = analytics.metrics().await;
    assert_eq!(metrics.errors.preload_errors, 1);
    assert_eq!(metrics.errors.load_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_sequence_stops_when_reader_moves_on() {
    let source = Arc::new(MockSource::new(100));
    let controller = PaginationController::<u64>::new(
        source.clone(),
        PaginationConfig {
            preload_pages: 3,
            preload_delay_ms: 100,
            ..config()
        },
    );
    controller.init().await.unwrap();

    let background = controller.clone();
    let sequence = tokio::spawn(async move { background.preload_next().await });

    // Page 2 lands at 100 ms; jump past the window before page 3 is due.
    tokio::time::sleep(Duration::from_millis(150)).await;
    controller.go_to_page(6).await.unwrap();
    assert_eq!(sequence.await.unwrap(), 1);

    let stats = controller.prefetch_stats();
    assert_eq!(stats.planned, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cancelled_sequences, 1);
    assert_eq!(source.requested(), vec![1, 2, 6]);
}

#[tokio::test]
async fn test_navigation_bounds() {
    let source = Arc::new(MockSource::new(30));
    let controller = controller(&source);

    // Nothing is known before the first load.
    controller.go_to_page(2).await.unwrap();
    assert_eq!(source.calls(), 0);

    controller.init().await.unwrap();
    controller.prev_page().await.unwrap();
    controller.go_to_page(0).await.unwrap();
    controller.go_to_page(4).await.unwrap();
    assert_eq!(controller.current_page(), 1);

    controller.go_to_last_page().await.unwrap();
    assert_eq!(controller.current_page(), 3);
    controller.next_page().await.unwrap();
    assert_eq!(controller.current_page(), 3);

    controller.go_to_first_page().await.unwrap();
    assert_eq!(controller.current_page(), 1);
    assert_eq!(source.calls(), 2);
    assert_eq!(controller.page_range(5), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_refresh_all_starts_over() {
    let source = Arc::new(MockSource::new(50));
    let controller = controller(&source);
    controller.init().await.unwrap();
    controller.go_to_page(4).await.unwrap();
    controller.preload_next().await;

    controller.refresh_all().await.unwrap();
    let state = controller.state().await;
    assert_eq!(state.current_page, 1);
    assert_eq!(state.loaded_pages, BTreeSet::from([1]));
    assert!(state.preloaded_pages.is_empty());
    assert_eq!(controller.cache_stats().await.size, 1);
}

#[tokio::test]
async fn test_shrinking_cache_size_forgets_evicted_pages() {
    let source = Arc::new(MockSource::new(100));
    let controller = controller(&source);
    controller.init().await.unwrap();
    for page in 2..=5 {
        controller.go_to_page(page).await.unwrap();
    }

    controller
        .set_config(PaginationConfig {
            cache_size: 2,
            ..config()
        })
        .await
        .unwrap();

    let state = controller.state().await;
    assert_eq!(state.loaded_pages, BTreeSet::from([4, 5]));
    assert_eq!(controller.cache_stats().await.max_size, 2);
}

#[tokio::test]
async fn test_governor_cleanup_reaches_controller() {
    let source = Arc::new(MockSource::new(100));
    let controller = controller(&source);
    controller.init().await.unwrap();
    controller.preload_next().await;

    let governor = MemoryGovernor::new(MemoryConfig {
        thresholds: MemoryThresholds {
            low: 0.0,
            medium: 0.0,
            high: 1.0,
            critical: 2.0,
        },
        ..Default::default()
    });
    governor
        .register_cache_manager("numbers", controller.managed_cache())
        .await;

    // High pressure: capacity first, then the prefetched pages.
    governor.check_pressure().await;
    let cleanup = governor.check_pressure().await.cleanup.unwrap();
    assert_eq!(cleanup.strategy, CleanupStrategy::ClearPreloaded);

    let state = controller.state().await;
    assert_eq!(state.loaded_pages, BTreeSet::from([1]));
    assert!(state.preloaded_pages.is_empty());
}

#[tokio::test]
async fn test_state_stream_reports_phases() {
    let source = Arc::new(MockSource::new(30));
    let controller = controller(&source);
    let mut states = controller.subscribe();

    let first = states.next().await.unwrap();
    assert_eq!(first.phase, Phase::Initial);

    controller.init().await.unwrap();
    let latest = states.next().await.unwrap();
    assert_eq!(latest.phase, Phase::Idle);
    assert_eq!(latest.total_pages, 3);
}

#[tokio::test]
async fn test_analytics_follow_navigation() {
    let source = Arc::new(MockSource::new(50));
    let analytics = AnalyticsAggregator::new(AnalyticsConfig::default());
    let controller = PaginationController::<u64>::builder(source.clone())
        .config(config())
        .analytics(analytics.clone())
        .build();

    controller.init().await.unwrap();
    controller.go_to_page(2).await.unwrap();
    controller.go_to_page(1).await.unwrap();

    let metrics = analytics.metrics().await;
    assert_eq!(metrics.cache.hits, 1);
    assert_eq!(metrics.cache.misses, 2);
    assert_eq!(metrics.load_times.page_loads, 2);
    assert_eq!(metrics.interactions.page_changes, 2);
    assert_eq!(metrics.session.unique_pages, 2);
    assert_eq!(metrics.memory.cache_entries, 2);
}
