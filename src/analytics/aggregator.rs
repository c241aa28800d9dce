//! Analytics aggregator: an append-only event log with incremental metrics.
//!
//! Every [`AnalyticsAggregator::track`] call updates the derived metrics in
//! place, so reading them never rescans the log. The log itself is capped;
//! metrics keep counting past the cap.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::analytics::event::{
    now_ms, AnalyticsEvent, EventKind, EventType, InteractionKind, LoadSource,
};
use crate::cache::Page;
use crate::config::{AnalyticsConfig, PerformanceThresholds, TierThreshold};
use crate::memory::pressure::bytes_to_mb;

/// Performance tier, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl fmt::Display for PerformanceRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PerformanceRating::Excellent => "excellent",
            PerformanceRating::Good => "good",
            PerformanceRating::Fair => "fair",
            PerformanceRating::Poor => "poor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadTimeMetrics {
    pub initial_load_ms: f64,
    /// Most recent non-initial page load.
    pub page_load_ms: f64,
    /// Most recent prefetch.
    pub preload_ms: f64,
    /// Mean over every page load.
    pub average_ms: f64,
    pub page_loads: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Percent.
    pub hit_rate: f64,
    /// Percent.
    pub miss_rate: f64,
    /// Hit-rate tier alone.
    pub efficiency: PerformanceRating,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self {
            hits: 0,
            misses: 0,
            hit_rate: 0.0,
            miss_rate: 0.0,
            efficiency: PerformanceRating::Poor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionMetrics {
    pub page_changes: u64,
    pub preload_triggers: u64,
    pub refresh_actions: u64,
    pub error_retries: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total: u64,
    pub load_errors: u64,
    pub preload_errors: u64,
    /// Percent of retries whose next event was not an error.
    pub retry_success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub estimated_usage_mb: f64,
    pub cache_entries: usize,
    pub average_entry_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub started_at_ms: u64,
    pub duration_ms: u64,
    /// Page loads, counting repeats.
    pub pages_visited: u64,
    pub unique_pages: usize,
}

/// Everything derived from the event log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginationMetrics {
    pub load_times: LoadTimeMetrics,
    pub cache: CacheMetrics,
    pub interactions: InteractionMetrics,
    pub errors: ErrorMetrics,
    pub memory: MemoryMetrics,
    pub session: SessionMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub rating: PerformanceRating,
    pub metrics: PaginationMetrics,
    pub recommendations: Vec<String>,
    pub thresholds: PerformanceThresholds,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsExport {
    pub events: Vec<AnalyticsEvent>,
    pub summary: PerformanceSummary,
    pub timestamp_ms: u64,
}

struct AnalyticsState {
    events: VecDeque<AnalyticsEvent>,
    metrics: PaginationMetrics,
    total_load_ms: f64,
    unique_pages: HashSet<Page>,
    retries: u64,
    successful_retries: u64,
    /// The previous event was a retry.
    retry_pending: bool,
    session_start: Instant,
}

impl AnalyticsState {
    fn new() -> Self {
        let metrics = PaginationMetrics {
            session: SessionMetrics {
                started_at_ms: now_ms(),
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            events: VecDeque::new(),
            metrics,
            total_load_ms: 0.0,
            unique_pages: HashSet::new(),
            retries: 0,
            successful_retries: 0,
            retry_pending: false,
            session_start: Instant::now(),
        }
    }
}

/// The analytics aggregator. Cheap to clone; clones share the log.
#[derive(Clone)]
pub struct AnalyticsAggregator {
    config: AnalyticsConfig,
    state: Arc<Mutex<AnalyticsState>>,
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

impl AnalyticsAggregator {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(AnalyticsState::new())),
        }
    }

    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.config.thresholds
    }

    /// Append an event and update the metrics it affects.
    pub async fn track(&self, event: AnalyticsEvent) {
        trace!(event = ?event.kind, "Analytics event");
        let mut state = self.state.lock().await;
        let thresholds = &self.config.thresholds;

        if state.retry_pending {
            state.retry_pending = false;
            if event.event_type() != EventType::Error {
                state.successful_retries += 1;
            }
        }

        match &event.kind {
            EventKind::PageLoad {
                page,
                duration_ms,
                initial,
            } => {
                let loads = &mut state.metrics.load_times;
                if *initial {
                    loads.initial_load_ms = *duration_ms;
                } else {
                    loads.page_load_ms = *duration_ms;
                }
                loads.page_loads += 1;
                state.total_load_ms += duration_ms;
                state.metrics.load_times.average_ms =
                    state.total_load_ms / state.metrics.load_times.page_loads as f64;
                state.metrics.session.pages_visited += 1;
                state.unique_pages.insert(*page);
                state.metrics.session.unique_pages = state.unique_pages.len();
            }
            EventKind::Preload { duration_ms, .. } => {
                state.metrics.load_times.preload_ms = *duration_ms;
            }
            EventKind::CacheHit { .. } | EventKind::CacheMiss { .. } => {
                let cache = &mut state.metrics.cache;
                if event.event_type() == EventType::CacheHit {
                    cache.hits += 1;
                } else {
                    cache.misses += 1;
                }
                let total = (cache.hits + cache.misses) as f64;
                cache.hit_rate = cache.hits as f64 / total * 100.0;
                cache.miss_rate = cache.misses as f64 / total * 100.0;
                cache.efficiency = efficiency(cache.hit_rate, thresholds);
            }
            EventKind::Error { source, .. } => {
                let errors = &mut state.metrics.errors;
                errors.total += 1;
                match source {
                    LoadSource::Load => errors.load_errors += 1,
                    LoadSource::Preload => errors.preload_errors += 1,
                }
            }
            EventKind::Interaction { kind, .. } => {
                let interactions = &mut state.metrics.interactions;
                interactions.total += 1;
                match kind {
                    InteractionKind::PageChange => interactions.page_changes += 1,
                    InteractionKind::PreloadTrigger => interactions.preload_triggers += 1,
                    InteractionKind::Refresh => interactions.refresh_actions += 1,
                    InteractionKind::Retry => {
                        interactions.error_retries += 1;
                        state.retries += 1;
                        state.retry_pending = true;
                    }
                }
            }
            EventKind::MemoryUsage {
                usage_bytes,
                cache_entries,
            } => {
                let memory = &mut state.metrics.memory;
                memory.estimated_usage_mb = bytes_to_mb(*usage_bytes);
                memory.cache_entries = *cache_entries;
                memory.average_entry_bytes = if *cache_entries > 0 {
                    *usage_bytes as f64 / *cache_entries as f64
                } else {
                    0.0
                };
            }
        }

        state.metrics.errors.retry_success_rate = if state.retries > 0 {
            state.successful_retries as f64 / state.retries as f64 * 100.0
        } else {
            0.0
        };

        if state.events.len() >= self.config.max_events.max(1) {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    pub async fn track_page_load(&self, page: Page, duration: Duration, initial: bool) {
        self.track(AnalyticsEvent::page_load(page, duration, initial)).await
    }

    pub async fn track_preload(&self, page: Page, duration: Duration) {
        self.track(AnalyticsEvent::preload(page, duration)).await
    }

    pub async fn track_cache_hit(&self, page: Page) {
        self.track(AnalyticsEvent::cache_hit(page)).await
    }

    pub async fn track_cache_miss(&self, page: Page) {
        self.track(AnalyticsEvent::cache_miss(page)).await
    }

    pub async fn track_error(&self, source: LoadSource, page: Page, message: impl Into<String>) {
        self.track(AnalyticsEvent::error(source, page, message)).await
    }

    pub async fn track_interaction(&self, kind: InteractionKind, page: Option<Page>) {
        self.track(AnalyticsEvent::interaction(kind, page)).await
    }

    pub async fn track_memory_usage(&self, usage_bytes: usize, cache_entries: usize) {
        self.track(AnalyticsEvent::memory_usage(usage_bytes, cache_entries))
            .await
    }

    /// Current metrics with the session duration filled in.
    pub async fn metrics(&self) -> PaginationMetrics {
        let state = self.state.lock().await;
        let mut metrics = state.metrics.clone();
        metrics.session.duration_ms = state.session_start.elapsed().as_millis() as u64;
        metrics
    }

    pub async fn performance_rating(&self) -> PerformanceRating {
        rate(&self.metrics().await, &self.config.thresholds)
    }

    pub async fn summary(&self) -> PerformanceSummary {
        let metrics = self.metrics().await;
        let thresholds = self.config.thresholds;
        PerformanceSummary {
            rating: rate(&metrics, &thresholds),
            recommendations: recommendations(&metrics, &thresholds),
            metrics,
            thresholds,
        }
    }

    pub async fn export(&self) -> AnalyticsExport {
        AnalyticsExport {
            events: self.events().await,
            summary: self.summary().await,
            timestamp_ms: now_ms(),
        }
    }

    pub async fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.export().await)
    }

    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.state.lock().await.events.iter().cloned().collect()
    }

    pub async fn events_by_kind(&self, kind: EventType) -> Vec<AnalyticsEvent> {
        self.filtered(|e| e.event_type() == kind).await
    }

    pub async fn events_by_page(&self, page: Page) -> Vec<AnalyticsEvent> {
        self.filtered(|e| e.page() == Some(page)).await
    }

    /// Events stamped within `[start_ms, end_ms]`.
    pub async fn events_in_range(&self, start_ms: u64, end_ms: u64) -> Vec<AnalyticsEvent> {
        self.filtered(|e| (start_ms..=end_ms).contains(&e.timestamp_ms))
            .await
    }

    async fn filtered(&self, keep: impl Fn(&AnalyticsEvent) -> bool) -> Vec<AnalyticsEvent> {
        let state = self.state.lock().await;
        state.events.iter().filter(|e| keep(e)).cloned().collect()
    }

    /// Drop every event, reset metrics and restart the session.
    pub async fn clear(&self) {
        *self.state.lock().await = AnalyticsState::new();
    }
}

fn meets(metrics: &PaginationMetrics, bar: &TierThreshold) -> bool {
    metrics.load_times.average_ms <= bar.load_time_ms
        && metrics.cache.hit_rate >= bar.cache_hit_rate
        && metrics.memory.estimated_usage_mb <= bar.memory_mb
}

/// Best tier whose bar all three metrics meet.
pub fn rate(metrics: &PaginationMetrics, thresholds: &PerformanceThresholds) -> PerformanceRating {
    if meets(metrics, &thresholds.excellent) {
        PerformanceRating::Excellent
    } else if meets(metrics, &thresholds.good) {
        PerformanceRating::Good
    } else if meets(metrics, &thresholds.fair) {
        PerformanceRating::Fair
    } else {
        PerformanceRating::Poor
    }
}

fn efficiency(hit_rate: f64, thresholds: &PerformanceThresholds) -> PerformanceRating {
    if hit_rate >= thresholds.excellent.cache_hit_rate {
        PerformanceRating::Excellent
    } else if hit_rate >= thresholds.good.cache_hit_rate {
        PerformanceRating::Good
    } else if hit_rate >= thresholds.fair.cache_hit_rate {
        PerformanceRating::Fair
    } else {
        PerformanceRating::Poor
    }
}

/// Advice for every metric that misses the good bar.
pub fn recommendations(
    metrics: &PaginationMetrics,
    thresholds: &PerformanceThresholds,
) -> Vec<String> {
    let good = &thresholds.good;
    let mut out = Vec::new();

    if metrics.load_times.average_ms > good.load_time_ms {
        out.push(
            "Reduce page load time by optimizing data source calls or caching more".to_string(),
        );
    }
    if metrics.cache.hit_rate < good.cache_hit_rate {
        out.push("Improve cache hit rate by increasing cache size or prefetch depth".to_string());
    }
    if metrics.memory.estimated_usage_mb > good.memory_mb {
        out.push("Reduce memory usage by cleaning up the cache or reducing its size".to_string());
    }
    if metrics.errors.total > 0 {
        out.push("Investigate load failures and retry behaviour".to_string());
    }
    if metrics.interactions.error_retries as f64 > metrics.interactions.total as f64 * 0.1 {
        out.push("High retry rate detected".to_string());
    }
    out
}
