//! Pagination controller: drives page loads and prefetches for one list.
//!
//! The controller owns its [`PaginationState`] and one page cache. Loads go
//! through a per-page in-flight table so concurrent requests for the same page
//! share a single fetch:
//!
//! ```text
//! go_to_page(n) ──► cache hit? ──yes──► promote to Loaded, prefetch ahead
//!                        │
//!                        no
//!                        ▼
//!                  in-flight(n)? ──yes──► attach (upgrade to direct)
//!                        │
//!                        no
//!                        ▼
//!                  fetch ──► store ──► prefetch ahead
//!                    │
//!                  error ──► engine.handle ──► RetryHandle ──► fetch again
//!                                   └── exhausted ──► Phase::Error
//! ```
//!
//! Every fetch carries a load id and the cache epoch it started under. A
//! result whose id is no longer registered, or whose epoch was bumped by
//! `refresh_all`, `clear_cache`, `set_items_per_page` or `destroy`, is
//! dropped on arrival.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsAggregator, AnalyticsEvent, InteractionKind, LoadSource};
use crate::cache::{
    new_shared_cache, CacheStats, ManagedCache, Origin, Page, Record, SharedPageCache,
};
use crate::config::PaginationConfig;
use crate::error::LoadFailure;
use crate::pagination::prefetcher::{PrefetchCounters, PrefetchStats, Prefetcher};
use crate::pagination::source::{DataSource, PageResult};
use crate::pagination::state::{PaginationInfo, PaginationState, Phase};
use crate::retry::{ErrorContext, ErrorEngine, ErrorRecord, RetryOutcome};

const COMPONENT: &str = "pagination";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Direct,
    Prefetch,
}

#[derive(Clone)]
enum FetchOutcome {
    Stored,
    /// Dropped on arrival: stale epoch, replaced load, or a prefetch of a
    /// page that got cached meanwhile.
    Superseded,
    Failed(Arc<anyhow::Error>),
}

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
    task: SharedFetch,
    /// Set once any direct request attaches; the result is then stored as `Loaded`.
    direct: Arc<AtomicBool>,
    load_id: u64,
    epoch: u64,
}

struct Inner<T: Record> {
    source: Arc<dyn DataSource<T>>,
    cache: SharedPageCache<T>,
    engine: ErrorEngine,
    analytics: Option<AnalyticsAggregator>,
    config: RwLock<PaginationConfig>,
    state: watch::Sender<PaginationState>,
    in_flight: Mutex<HashMap<Page, InFlight>>,
    epoch: AtomicU64,
    next_load_id: AtomicU64,
    direct_waiters: AtomicUsize,
    prefetch_waiters: AtomicUsize,
    /// A direct load has completed at least once.
    initialized: AtomicBool,
    prefetch: PrefetchCounters,
    /// Background prefetch sequence started by the last navigation.
    preload_task: Mutex<Option<AbortHandle>>,
}

impl<T: Record> Inner<T> {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn phase(&self, state: &PaginationState) -> Phase {
        if self.direct_waiters.load(Ordering::SeqCst) > 0 {
            Phase::Loading
        } else if state.error.is_some() {
            Phase::Error
        } else if self.prefetch_waiters.load(Ordering::SeqCst) > 0 {
            Phase::Preloading
        } else if !self.initialized.load(Ordering::SeqCst) {
            Phase::Initial
        } else {
            Phase::Idle
        }
    }

    /// Apply `f` to the state and recompute the phase.
    fn update(&self, f: impl FnOnce(&mut PaginationState)) {
        self.state.send_modify(|state| {
            f(state);
            state.phase = self.phase(state);
        });
    }

    fn refresh_phase(&self) {
        self.state.send_if_modified(|state| {
            let phase = self.phase(state);
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        });
    }

    async fn track(&self, event: AnalyticsEvent) {
        if let Some(analytics) = &self.analytics {
            analytics.track(event).await;
        }
    }

    /// Write a fetched page and fold the response into the state.
    async fn store(
        &self,
        page: Page,
        result: PageResult<T>,
        direct: bool,
        duration: Duration,
    ) -> FetchOutcome {
        let origin = if direct { Origin::Loaded } else { Origin::Preloaded };
        let (evicted, cached, stats) = {
            let mut cache = self.cache.write().await;
            if !direct && cache.has(page) {
                self.prefetch.discarded();
                debug!(page, "Dropped prefetch of an already cached page");
                return FetchOutcome::Superseded;
            }
            let evicted = cache.set(page, result.items, origin);
            let cached: BTreeSet<Page> = cache.pages().into_iter().collect();
            (evicted, cached, cache.stats())
        };

        let initial = direct && !self.initialized.swap(true, Ordering::SeqCst);
        self.update(|state| {
            state.apply_totals(result.total_items, result.total_pages);
            if let Some(victim) = evicted {
                state.forget(victim);
            }
            if page <= state.total_pages {
                if direct {
                    state.mark_loaded(page);
                } else {
                    state.mark_preloaded(page);
                }
            }
            state.retain_cached(|p| cached.contains(&p));
        });

        let duration_ms = duration.as_millis() as u64;
        if direct {
            info!(page, duration_ms, origin = %origin, "Loaded page");
            self.track(AnalyticsEvent::page_load(page, duration, initial)).await;
        } else {
            debug!(page, duration_ms, "Preloaded page");
            self.prefetch.completed();
            self.track(AnalyticsEvent::preload(page, duration)).await;
        }
        self.track(AnalyticsEvent::memory_usage(stats.estimated_memory_bytes, stats.size))
            .await;

        FetchOutcome::Stored
    }

    /// Record a prefetch failure. Never surfaces in the state.
    async fn prefetch_failed(&self, page: Page, err: &anyhow::Error) {
        self.prefetch.failed();
        let context = ErrorContext::new(COMPONENT, "preload_page").with_page(page);
        let record = self.engine.handle(err, context).await;
        debug!(page, id = %record.id, error = %record.message, "Prefetch failed");
        self.track(AnalyticsEvent::error(LoadSource::Preload, page, record.message))
            .await;
    }
}

/// Counts a waiter for the phase machine while alive.
struct Waiter<'a, T: Record> {
    inner: &'a Inner<T>,
    kind: LoadKind,
}

impl<'a, T: Record> Waiter<'a, T> {
    fn new(inner: &'a Inner<T>, kind: LoadKind) -> Self {
        counter(inner, kind).fetch_add(1, Ordering::SeqCst);
        inner.refresh_phase();
        Self { inner, kind }
    }
}

impl<T: Record> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        counter(self.inner, self.kind).fetch_sub(1, Ordering::SeqCst);
        self.inner.refresh_phase();
    }
}

fn counter<T: Record>(inner: &Inner<T>, kind: LoadKind) -> &AtomicUsize {
    match kind {
        LoadKind::Direct => &inner.direct_waiters,
        LoadKind::Prefetch => &inner.prefetch_waiters,
    }
}

/// Runs one fetch on its own task. Holds only a weak reference to the
/// controller while the source is working.
async fn run_fetch<T: Record>(
    inner: Weak<Inner<T>>,
    source: Arc<dyn DataSource<T>>,
    page: Page,
    items_per_page: u32,
    load_id: u64,
    epoch: u64,
    direct: Arc<AtomicBool>,
) -> FetchOutcome {
    let started = Instant::now();
    let result = source.fetch_page(page, items_per_page).await;
    let duration = started.elapsed();

    let Some(inner) = inner.upgrade() else {
        return FetchOutcome::Superseded;
    };

    let (current, direct) = {
        let mut in_flight = inner.in_flight.lock().await;
        let ours = in_flight.get(&page).is_some_and(|f| f.load_id == load_id);
        if ours {
            in_flight.remove(&page);
        }
        // Nobody can attach once the entry is gone.
        (ours && inner.epoch() == epoch, direct.load(Ordering::SeqCst))
    };

    match result {
        Ok(_) | Err(_) if !current => {
            if !direct {
                inner.prefetch.discarded();
            }
            debug!(page, load_id, "Discarded superseded result");
            FetchOutcome::Superseded
        }
        Ok(result) => inner.store(page, result, direct, duration).await,
        Err(err) => {
            if !direct {
                inner.prefetch_failed(page, &err).await;
            }
            FetchOutcome::Failed(Arc::new(err))
        }
    }
}

/// Preloading pagination controller.
pub struct PaginationController<T: Record> {
    inner: Arc<Inner<T>>,
}

impl<T: Record> Clone for PaginationController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`PaginationController`].
pub struct ControllerBuilder<T: Record> {
    source: Arc<dyn DataSource<T>>,
    config: PaginationConfig,
    engine: Option<ErrorEngine>,
    analytics: Option<AnalyticsAggregator>,
}

impl<T: Record> ControllerBuilder<T> {
    pub fn config(mut self, config: PaginationConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an error engine, e.g. across several controllers.
    pub fn errors(mut self, engine: ErrorEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn analytics(mut self, analytics: AnalyticsAggregator) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn build(self) -> PaginationController<T> {
        let mut config = self.config;
        config.items_per_page = config.items_per_page.max(1);
        let (state, _) = watch::channel(PaginationState::new(config.items_per_page));

        PaginationController {
            inner: Arc::new(Inner {
                source: self.source,
                cache: new_shared_cache(config.cache_size),
                engine: self.engine.unwrap_or_default(),
                analytics: self.analytics,
                config: RwLock::new(config),
                state,
                in_flight: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                next_load_id: AtomicU64::new(0),
                direct_waiters: AtomicUsize::new(0),
                prefetch_waiters: AtomicUsize::new(0),
                initialized: AtomicBool::new(false),
                prefetch: PrefetchCounters::default(),
                preload_task: Mutex::new(None),
            }),
        }
    }
}

impl<T: Record> PaginationController<T> {
    pub fn builder(source: Arc<dyn DataSource<T>>) -> ControllerBuilder<T> {
        ControllerBuilder {
            source,
            config: PaginationConfig::default(),
            engine: None,
            analytics: None,
        }
    }

    /// Controller with default engine and no analytics.
    pub fn new(source: Arc<dyn DataSource<T>>, config: PaginationConfig) -> Self {
        Self::builder(source).config(config).build()
    }

    // ----- lifecycle -----

    /// Load page 1.
    pub async fn init(&self) -> Result<(), LoadFailure> {
        self.show_page(1).await
    }

    /// Cancel prefetching, discard in-flight results and empty the cache.
    pub async fn destroy(&self) {
        self.invalidate().await;
        info!("Pagination controller destroyed");
    }

    // ----- reads -----

    /// Current state, with page sets reconciled against the cache.
    pub async fn state(&self) -> PaginationState {
        self.reconcile().await;
        self.snapshot()
    }

    /// Current state as last published.
    pub fn snapshot(&self) -> PaginationState {
        self.inner.state.borrow().clone()
    }

    /// State changes as a stream, starting with the current state.
    pub fn subscribe(&self) -> WatchStream<PaginationState> {
        WatchStream::new(self.inner.state.subscribe())
    }

    pub fn current_page(&self) -> Page {
        self.inner.state.borrow().current_page
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase
    }

    pub fn error(&self) -> Option<LoadFailure> {
        self.inner.state.borrow().error.clone()
    }

    /// Items of the current page, empty until it is loaded.
    pub async fn current_items(&self) -> Vec<T> {
        let page = self.current_page();
        self.inner
            .cache
            .read()
            .await
            .peek(page)
            .map(|entry| entry.items.clone())
            .unwrap_or_default()
    }

    pub async fn is_page_loaded(&self, page: Page) -> bool {
        let tracked = self.inner.state.borrow().loaded_pages.contains(&page);
        tracked
            && self
                .inner
                .cache
                .read()
                .await
                .peek(page)
                .is_some_and(|entry| entry.origin == Origin::Loaded)
    }

    pub async fn is_page_preloaded(&self, page: Page) -> bool {
        let tracked = self.inner.state.borrow().preloaded_pages.contains(&page);
        tracked
            && self
                .inner
                .cache
                .read()
                .await
                .peek(page)
                .is_some_and(|entry| entry.origin == Origin::Preloaded)
    }

    pub fn has_next_page(&self) -> bool {
        self.inner.state.borrow().has_next_page()
    }

    pub fn has_prev_page(&self) -> bool {
        self.inner.state.borrow().has_prev_page()
    }

    pub fn info(&self) -> PaginationInfo {
        self.inner.state.borrow().info()
    }

    pub fn page_range(&self, max_visible: u32) -> Vec<Page> {
        self.inner.state.borrow().page_range(max_visible)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.read().await.stats()
    }

    pub fn prefetch_stats(&self) -> PrefetchStats {
        self.inner.prefetch.snapshot()
    }

    pub async fn config(&self) -> PaginationConfig {
        self.inner.config.read().await.clone()
    }

    /// Handle for registering this controller's cache with a memory governor.
    pub fn managed_cache(&self) -> Arc<dyn ManagedCache> {
        self.inner.cache.clone()
    }

    pub fn errors(&self) -> &ErrorEngine {
        &self.inner.engine
    }

    // ----- navigation -----

    /// Show page `page`. No-op when out of range or already current.
    pub async fn go_to_page(&self, page: Page) -> Result<(), LoadFailure> {
        let moved = self.inner.state.send_if_modified(|state| {
            if !state.in_bounds(page) || state.current_page == page {
                return false;
            }
            state.current_page = page;
            true
        });
        if !moved {
            return Ok(());
        }

        debug!(page, "Page change");
        self.inner
            .track(AnalyticsEvent::interaction(InteractionKind::PageChange, Some(page)))
            .await;
        self.show_page(page).await
    }

    pub async fn next_page(&self) -> Result<(), LoadFailure> {
        let state = self.snapshot();
        if !state.has_next_page() {
            return Ok(());
        }
        self.go_to_page(state.current_page + 1).await
    }

    pub async fn prev_page(&self) -> Result<(), LoadFailure> {
        let state = self.snapshot();
        if !state.has_prev_page() {
            return Ok(());
        }
        self.go_to_page(state.current_page - 1).await
    }

    pub async fn go_to_first_page(&self) -> Result<(), LoadFailure> {
        self.go_to_page(1).await
    }

    pub async fn go_to_last_page(&self) -> Result<(), LoadFailure> {
        let last = self.inner.state.borrow().total_pages;
        self.go_to_page(last).await
    }

    /// Serve `page` from the cache or load it, then prefetch ahead.
    async fn show_page(&self, page: Page) -> Result<(), LoadFailure> {
        let hit = {
            let mut cache = self.inner.cache.write().await;
            let hit = cache.get(page).is_some();
            if hit {
                cache.mark_loaded(page);
            }
            hit
        };

        if hit {
            self.inner.update(|state| state.mark_loaded(page));
            self.inner.track(AnalyticsEvent::cache_hit(page)).await;
        } else {
            self.inner.track(AnalyticsEvent::cache_miss(page)).await;
            self.load_direct(page, false).await?;
        }

        self.schedule_preload().await;
        Ok(())
    }

    // ----- refresh & invalidation -----

    /// Drop `page` from the cache and load it again, even if cached.
    pub async fn refresh_page(&self, page: Page) -> Result<(), LoadFailure> {
        let allowed = {
            let state = self.inner.state.borrow();
            page == state.current_page || state.in_bounds(page)
        };
        if !allowed {
            return Ok(());
        }

        self.inner
            .track(AnalyticsEvent::interaction(InteractionKind::Refresh, Some(page)))
            .await;
        self.inner.cache.write().await.delete(page);
        self.inner.update(|state| state.forget(page));
        self.load_direct(page, true).await
    }

    pub async fn refresh_current(&self) -> Result<(), LoadFailure> {
        self.refresh_page(self.current_page()).await
    }

    /// Empty the cache, go back to page 1 and load it.
    pub async fn refresh_all(&self) -> Result<(), LoadFailure> {
        self.invalidate().await;
        self.inner.update(|state| {
            state.current_page = 1;
            state.error = None;
            state.retry_count = 0;
        });
        self.inner
            .track(AnalyticsEvent::interaction(InteractionKind::Refresh, None))
            .await;
        self.load_direct(1, true).await?;
        self.schedule_preload().await;
        Ok(())
    }

    /// Empty the cache. The current page stays where it is.
    pub async fn clear_cache(&self) {
        self.invalidate().await;
    }

    /// Change the page size. Invalidates everything and reloads page 1.
    pub async fn set_items_per_page(&self, items_per_page: u32) -> Result<(), LoadFailure> {
        let items_per_page = items_per_page.max(1);
        self.inner.config.write().await.items_per_page = items_per_page;
        self.invalidate().await;
        self.inner.update(|state| {
            state.items_per_page = items_per_page;
            state.current_page = 1;
            state.error = None;
            state.retry_count = 0;
        });
        info!(items_per_page, "Page size changed");
        self.load_direct(1, true).await?;
        self.schedule_preload().await;
        Ok(())
    }

    /// Replace the tuning. Cache capacity applies immediately; a new page
    /// size behaves like [`set_items_per_page`](Self::set_items_per_page).
    pub async fn set_config(&self, config: PaginationConfig) -> Result<(), LoadFailure> {
        let page_size_changed = {
            let mut current = self.inner.config.write().await;
            let changed = current.items_per_page != config.items_per_page;
            let items_per_page = current.items_per_page;
            *current = PaginationConfig {
                items_per_page,
                ..config.clone()
            };
            changed
        };

        let evicted = self.inner.cache.write().await.set_max_size(config.cache_size);
        if !evicted.is_empty() {
            self.inner.update(|state| {
                for page in &evicted {
                    state.forget(*page);
                }
            });
        }

        if page_size_changed {
            self.set_items_per_page(config.items_per_page).await?;
        }
        Ok(())
    }

    /// Bump the epoch, stop prefetching and empty cache and page sets.
    async fn invalidate(&self) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.inner.preload_task.lock().await.take() {
            task.abort();
        }
        self.inner.in_flight.lock().await.clear();
        self.inner.cache.write().await.clear();
        self.inner.update(|state| state.forget_all());
        debug!(epoch, "Invalidated cache");
    }

    /// Drop page-set members evicted behind our back (e.g. by the governor).
    async fn reconcile(&self) {
        let cached: BTreeSet<Page> = self.inner.cache.read().await.pages().into_iter().collect();
        self.inner.state.send_if_modified(|state| {
            let before = (state.loaded_pages.len(), state.preloaded_pages.len());
            state.retain_cached(|p| cached.contains(&p));
            before != (state.loaded_pages.len(), state.preloaded_pages.len())
        });
    }

    // ----- prefetch -----

    /// Prefetch `page` unless it is out of range or already cached.
    /// Returns true if this call stored it.
    pub async fn preload_page(&self, page: Page) -> bool {
        let in_bounds = self.inner.state.borrow().in_bounds(page);
        if !in_bounds || self.inner.cache.read().await.has(page) {
            return false;
        }
        self.prefetch(page).await
    }

    /// Prefetch the pages after the current one, one at a time.
    ///
    /// Waits `preload_delay` before each request. Stops as soon as the cache
    /// is invalidated or the reader moves so that the next page is no longer
    /// ahead of them. Returns the number of pages stored.
    pub async fn preload_next(&self) -> usize {
        let epoch = self.inner.epoch();
        let (current, total) = {
            let state = self.inner.state.borrow();
            (state.current_page, state.total_pages)
        };
        let (preload_pages, delay) = {
            let config = self.inner.config.read().await;
            (config.preload_pages, config.preload_delay())
        };

        let prefetcher = Prefetcher::new(preload_pages);
        let candidates = self
            .inner
            .cache
            .read()
            .await
            .preload_candidates(current, preload_pages);
        let plan = prefetcher.plan(current, total, candidates);
        if plan.is_empty() {
            return 0;
        }

        self.inner.prefetch.planned(plan.len());
        self.inner
            .track(AnalyticsEvent::interaction(
                InteractionKind::PreloadTrigger,
                Some(current),
            ))
            .await;

        let mut stored = 0;
        for request in plan {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let (now_current, now_total) = {
                let state = self.inner.state.borrow();
                (state.current_page, state.total_pages)
            };
            let wanted = prefetcher.in_window(request.page, now_current, now_total);
            if self.inner.epoch() != epoch || !wanted {
                debug!(
                    page = request.page,
                    current = now_current,
                    "Prefetch sequence cancelled"
                );
                self.inner.prefetch.cancelled();
                break;
            }
            if self.inner.cache.read().await.has(request.page) {
                self.inner.prefetch.skipped();
                continue;
            }
            if self.prefetch(request.page).await {
                stored += 1;
            }
        }
        stored
    }

    async fn prefetch(&self, page: Page) -> bool {
        let _waiter = Waiter::new(&self.inner, LoadKind::Prefetch);
        matches!(
            self.fetch(page, LoadKind::Prefetch, false).await,
            FetchOutcome::Stored
        )
    }

    /// Start a background prefetch sequence, replacing the previous one.
    async fn schedule_preload(&self) {
        if !self.inner.config.read().await.background_preload {
            return;
        }
        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller.preload_next().await;
        });
        if let Some(previous) = self.inner.preload_task.lock().await.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    // ----- loading -----

    /// Attach to the in-flight fetch for `page` or start one. `fresh` never
    /// attaches: an existing fetch is superseded.
    ///
    /// The fetch runs as its own task, so it completes even if every caller
    /// waiting on it is cancelled.
    async fn fetch(&self, page: Page, kind: LoadKind, fresh: bool) -> FetchOutcome {
        let task = {
            let mut in_flight = self.inner.in_flight.lock().await;
            let epoch = self.inner.epoch();
            match in_flight.get(&page) {
                Some(existing) if !fresh && existing.epoch == epoch => {
                    if kind == LoadKind::Direct {
                        existing.direct.store(true, Ordering::SeqCst);
                    }
                    debug!(page, load_id = existing.load_id, "Attached to in-flight load");
                    existing.task.clone()
                }
                _ => {
                    let load_id = self.inner.next_load_id.fetch_add(1, Ordering::SeqCst);
                    let direct = Arc::new(AtomicBool::new(kind == LoadKind::Direct));
                    let items_per_page = self.inner.state.borrow().items_per_page;
                    let handle = tokio::spawn(run_fetch(
                        Arc::downgrade(&self.inner),
                        Arc::clone(&self.inner.source),
                        page,
                        items_per_page,
                        load_id,
                        epoch,
                        Arc::clone(&direct),
                    ));
                    let task = handle
                        .map(|joined| {
                            joined.unwrap_or_else(|err| {
                                FetchOutcome::Failed(Arc::new(anyhow::Error::new(err)))
                            })
                        })
                        .boxed()
                        .shared();
                    in_flight.insert(
                        page,
                        InFlight {
                            task: task.clone(),
                            direct,
                            load_id,
                            epoch,
                        },
                    );
                    task
                }
            }
        };
        task.await
    }

    /// Load `page` on behalf of the reader, retrying per the error engine.
    ///
    /// A `fresh` load was asked for explicitly and keeps retrying wherever the
    /// reader goes. Otherwise retries stop once the reader leaves `page`.
    async fn load_direct(&self, page: Page, fresh: bool) -> Result<(), LoadFailure> {
        let _waiter = Waiter::new(&self.inner, LoadKind::Direct);
        let epoch = self.inner.epoch();
        let pinned = fresh;
        self.inner.update(|state| state.error = None);

        let mut record: Option<ErrorRecord> = None;
        let mut retries = 0;
        let mut fresh = fresh;

        loop {
            let outcome = self.fetch(page, LoadKind::Direct, fresh).await;
            fresh = false;

            let err = match outcome {
                FetchOutcome::Stored => {
                    if let Some(record) = &record {
                        self.inner.engine.resolve(&record.id).await;
                    }
                    self.inner.update(|state| {
                        state.retry_count = 0;
                        state.error = None;
                    });
                    return Ok(());
                }
                FetchOutcome::Superseded => {
                    if let Some(record) = &record {
                        self.inner.engine.resolve(&record.id).await;
                    }
                    return Ok(());
                }
                FetchOutcome::Failed(err) => err,
            };

            if self.inner.epoch() != epoch {
                return Ok(());
            }

            let current = match record.take() {
                Some(existing) => existing,
                None => {
                    let context = ErrorContext::new(COMPONENT, "load_page").with_page(page);
                    self.inner.engine.handle(&err, context).await
                }
            };
            self.inner
                .track(AnalyticsEvent::error(LoadSource::Load, page, format!("{err:#}")))
                .await;

            if !pinned && !self.is_current(page) {
                self.abandon(page, &current).await;
                return Ok(());
            }

            let outcome = match self.inner.engine.schedule_retry(&current.id).await {
                Some(handle) => {
                    debug!(
                        page,
                        attempt = handle.attempt(),
                        delay_ms = handle.delay().as_millis() as u64,
                        "Retrying load"
                    );
                    handle.wait().await
                }
                None => RetryOutcome::Cancelled,
            };

            match outcome {
                RetryOutcome::Fired { .. } if !pinned && !self.is_current(page) => {
                    self.abandon(page, &current).await;
                    return Ok(());
                }
                RetryOutcome::Fired { retry_count } if self.inner.epoch() == epoch => {
                    retries = retry_count;
                    self.inner.update(|state| state.retry_count = retry_count);
                    self.inner
                        .track(AnalyticsEvent::interaction(InteractionKind::Retry, Some(page)))
                        .await;
                    record = Some(current);
                }
                RetryOutcome::Fired { .. } => {
                    self.inner.engine.resolve(&current.id).await;
                    return Ok(());
                }
                RetryOutcome::Cancelled => {
                    return Err(self.surface(page, &current, retries));
                }
            }
        }
    }

    fn is_current(&self, page: Page) -> bool {
        self.inner.state.borrow().current_page == page
    }

    /// Give up on a failing page the reader has left. The state is untouched.
    async fn abandon(&self, page: Page, record: &ErrorRecord) {
        debug!(page, id = %record.id, "Reader left page, dropping retries");
        self.inner.engine.resolve(&record.id).await;
    }

    /// Move to the error phase with `record` as the visible failure.
    fn surface(&self, page: Page, record: &ErrorRecord, retries: u32) -> LoadFailure {
        let failure = LoadFailure {
            page,
            message: record.message.clone(),
            kind: record.kind,
            severity: record.severity,
            error_id: Some(record.id),
            retry_count: retries,
        };
        warn!(
            page,
            retries,
            kind = %record.kind,
            error = %record.message,
            "Load failed"
        );
        let surfaced = failure.clone();
        self.inner.update(|state| {
            state.error = Some(surfaced);
            state.retry_count = retries;
        });
        failure
    }
}
