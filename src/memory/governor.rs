//! Memory governor: watches registered caches and sheds load under pressure.
//!
//! The governor never creates or destroys a cache. It keeps weak, name-keyed
//! references and acts only through [`ManagedCache`]. Each pressure check runs
//! at most one cleanup strategy.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{ManagedCache, Origin};
use crate::config::{MemoryConfig, MemoryThresholds};
use crate::memory::history::{MemoryForecast, MemoryTrend, UsageHistory};
use crate::memory::pressure::{CacheUsage, MemorySnapshot, PressureLevel};
use crate::memory::strategy::CleanupStrategy;

/// Runtime hook asked to collect garbage under critical pressure.
pub type GcHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// What one cleanup did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupOutcome {
    pub strategy: CleanupStrategy,
    pub pressure: PressureLevel,
    /// Pages removed across every cache.
    pub pages_evicted: usize,
    /// Set when the strategy failed.
    pub error: Option<String>,
}

impl CleanupOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one pressure check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PressureCheck {
    pub snapshot: MemorySnapshot,
    pub cleanup: Option<CleanupOutcome>,
}

/// Result of a manual [`MemoryGovernor::optimize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeResult {
    pub optimized: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub current: MemorySnapshot,
    pub history: Vec<f64>,
    pub trend: MemoryTrend,
    pub forecast: MemoryForecast,
    pub caches: Vec<String>,
    pub monitoring: bool,
    pub thresholds: MemoryThresholds,
}

struct GovernorState {
    thresholds: MemoryThresholds,
    history: UsageHistory,
    /// Pressure and strategy of the last cleanup, for escalation.
    last_cleanup: Option<(PressureLevel, CleanupStrategy)>,
    /// Sampling interval the forecast is expressed in.
    sample_interval: Duration,
}

struct GovernorInner {
    config: MemoryConfig,
    caches: RwLock<HashMap<String, Weak<dyn ManagedCache>>>,
    state: Mutex<GovernorState>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    gc_hook: Option<GcHook>,
}

/// The memory governor. Cheap to clone.
#[derive(Clone)]
pub struct MemoryGovernor {
    inner: Arc<GovernorInner>,
}

impl Default for MemoryGovernor {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryGovernor {
    pub fn new(config: MemoryConfig) -> Self {
        Self::build(config, None)
    }

    /// Governor whose critical-pressure GC strategy calls `hook`.
    pub fn with_gc_hook(config: MemoryConfig, hook: GcHook) -> Self {
        Self::build(config, Some(hook))
    }

    fn build(config: MemoryConfig, gc_hook: Option<GcHook>) -> Self {
        let state = GovernorState {
            thresholds: config.thresholds,
            history: UsageHistory::new(config.history_size),
            last_cleanup: None,
            sample_interval: config.monitor_interval(),
        };
        Self {
            inner: Arc::new(GovernorInner {
                config,
                caches: RwLock::new(HashMap::new()),
                state: Mutex::new(state),
                monitor: Mutex::new(None),
                gc_hook,
            }),
        }
    }

    /// Track a cache under `name`, replacing any previous registration.
    pub async fn register_cache_manager(
        &self,
        name: impl Into<String>,
        cache: Arc<dyn ManagedCache>,
    ) {
        let name = name.into();
        debug!(cache = %name, "Registered cache");
        self.inner
            .caches
            .write()
            .await
            .insert(name, Arc::downgrade(&cache));
    }

    pub async fn unregister_cache_manager(&self, name: &str) -> bool {
        self.inner.caches.write().await.remove(name).is_some()
    }

    /// Names of the caches still alive, sorted.
    pub async fn registered(&self) -> Vec<String> {
        self.live_caches().await.into_iter().map(|(name, _)| name).collect()
    }

    /// Live caches, pruning registrations whose owner dropped the cache.
    async fn live_caches(&self) -> Vec<(String, Arc<dyn ManagedCache>)> {
        let mut caches = self.inner.caches.write().await;
        caches.retain(|name, weak| {
            let alive = weak.strong_count() > 0;
            if !alive {
                debug!(cache = %name, "Pruned dropped cache");
            }
            alive
        });
        let mut live: Vec<(String, Arc<dyn ManagedCache>)> = caches
            .iter()
            .filter_map(|(name, weak)| weak.upgrade().map(|cache| (name.clone(), cache)))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    /// Recompute the snapshot from the registered caches.
    pub async fn memory_stats(&self) -> MemorySnapshot {
        let caches = self.live_caches().await;
        self.snapshot_of(&caches).await
    }

    async fn snapshot_of(&self, caches: &[(String, Arc<dyn ManagedCache>)]) -> MemorySnapshot {
        let mut usage = Vec::with_capacity(caches.len());
        for (name, cache) in caches {
            let stats = cache.stats().await;
            usage.push(CacheUsage {
                name: name.clone(),
                entries: stats.size,
                max_entries: stats.max_size,
                estimated_bytes: stats.estimated_memory_bytes,
            });
        }
        let thresholds = self.inner.state.lock().await.thresholds;
        MemorySnapshot::from_caches(usage, &thresholds)
    }

    /// Sample usage and run at most one cleanup strategy.
    pub async fn check_pressure(&self) -> PressureCheck {
        let caches = self.live_caches().await;
        let snapshot = self.snapshot_of(&caches).await;
        self.inner.state.lock().await.history.push(snapshot.usage_mb());

        debug!(
            usage_mb = snapshot.usage_mb(),
            entries = snapshot.cache_entry_count,
            pressure = %snapshot.pressure,
            "Memory check"
        );

        let cleanup = self.run_cleanup(snapshot.pressure, &caches).await;
        PressureCheck { snapshot, cleanup }
    }

    /// Manual one-shot cleanup at the current pressure.
    pub async fn optimize(&self) -> OptimizeResult {
        let caches = self.live_caches().await;
        let snapshot = self.snapshot_of(&caches).await;
        if snapshot.pressure == PressureLevel::Low {
            return OptimizeResult {
                optimized: false,
                message: "Memory usage is already optimal".to_string(),
            };
        }

        match self.run_cleanup(snapshot.pressure, &caches).await {
            Some(outcome) if outcome.succeeded() => OptimizeResult {
                optimized: true,
                message: outcome.strategy.description().to_string(),
            },
            Some(outcome) => OptimizeResult {
                optimized: false,
                message: format!(
                    "{} failed: {}",
                    outcome.strategy,
                    outcome.error.unwrap_or_default()
                ),
            },
            None => OptimizeResult {
                optimized: false,
                message: "No optimization strategies available".to_string(),
            },
        }
    }

    async fn run_cleanup(
        &self,
        pressure: PressureLevel,
        caches: &[(String, Arc<dyn ManagedCache>)],
    ) -> Option<CleanupOutcome> {
        let strategy = {
            let mut state = self.inner.state.lock().await;
            let strategy = CleanupStrategy::select(pressure, state.last_cleanup);
            state.last_cleanup = strategy.map(|s| (pressure, s));
            strategy?
        };

        let outcome = match self.execute(strategy, caches).await {
            Ok(pages_evicted) => {
                info!(
                    strategy = %strategy,
                    pressure = %pressure,
                    pages_evicted,
                    "Memory cleanup: {}",
                    strategy.description()
                );
                CleanupOutcome {
                    strategy,
                    pressure,
                    pages_evicted,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    strategy = %strategy,
                    pressure = %pressure,
                    error = %e,
                    "Memory cleanup failed"
                );
                CleanupOutcome {
                    strategy,
                    pressure,
                    pages_evicted: 0,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        Some(outcome)
    }

    async fn execute(
        &self,
        strategy: CleanupStrategy,
        caches: &[(String, Arc<dyn ManagedCache>)],
    ) -> anyhow::Result<usize> {
        let mut evicted = 0;
        match strategy {
            CleanupStrategy::ClearOldEntries => {
                let max_age = self.inner.config.max_entry_age();
                for (_, cache) in caches {
                    evicted += cache.evict_older_than(max_age).await.len();
                }
            }
            CleanupStrategy::ReduceCacheSize => {
                let factor = self.inner.config.capacity_scale;
                for (_, cache) in caches {
                    evicted += cache.scale_capacity(factor).await.len();
                }
            }
            CleanupStrategy::ClearPreloaded => {
                for (_, cache) in caches {
                    evicted += cache.remove_origin(Origin::Preloaded).await.len();
                }
            }
            CleanupStrategy::ForceGc => match &self.inner.gc_hook {
                Some(hook) => hook()?,
                None => debug!("No GC hook installed"),
            },
            CleanupStrategy::ClearAll => {
                for (_, cache) in caches {
                    evicted += cache.stats().await.size;
                    cache.clear().await;
                }
            }
        }
        Ok(evicted)
    }

    /// Start periodic pressure checks. Returns false if already running.
    pub async fn start_monitoring(&self, interval: Duration) -> bool {
        let mut monitor = self.inner.monitor.lock().await;
        if monitor.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let interval = interval.max(Duration::from_millis(1));
        self.inner.state.lock().await.sample_interval = interval;

        let weak = Arc::downgrade(&self.inner);
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                MemoryGovernor { inner }.check_pressure().await;
            }
        }));

        info!(interval_ms = interval.as_millis() as u64, "Memory monitoring started");
        true
    }

    /// Start monitoring at the configured interval.
    pub async fn start_default_monitoring(&self) -> bool {
        self.start_monitoring(self.inner.config.monitor_interval()).await
    }

    /// Stop periodic checks. Returns false if not running.
    pub async fn stop_monitoring(&self) -> bool {
        match self.inner.monitor.lock().await.take() {
            Some(task) => {
                task.abort();
                info!("Memory monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn set_thresholds(&self, thresholds: MemoryThresholds) {
        self.inner.state.lock().await.thresholds = thresholds;
    }

    pub async fn thresholds(&self) -> MemoryThresholds {
        self.inner.state.lock().await.thresholds
    }

    pub async fn history(&self) -> Vec<f64> {
        self.inner.state.lock().await.history.to_vec()
    }

    pub async fn trend(&self) -> MemoryTrend {
        self.inner.state.lock().await.history.trend()
    }

    pub async fn forecast(&self) -> MemoryForecast {
        let state = self.inner.state.lock().await;
        let samples_per_minute = 60.0 / state.sample_interval.as_secs_f64().max(0.001);
        state.history.forecast(samples_per_minute)
    }

    pub async fn memory_report(&self) -> MemoryReport {
        let current = self.memory_stats().await;
        let caches = current.caches.iter().map(|c| c.name.clone()).collect();
        let (history, trend, thresholds) = {
            let state = self.inner.state.lock().await;
            (state.history.to_vec(), state.history.trend(), state.thresholds)
        };
        MemoryReport {
            current,
            history,
            trend,
            forecast: self.forecast().await,
            caches,
            monitoring: self.is_monitoring().await,
            thresholds,
        }
    }

    /// Stop monitoring and forget every registration and sample. Registered
    /// caches keep their contents.
    pub async fn destroy(&self) {
        self.stop_monitoring().await;
        self.inner.caches.write().await.clear();
        let mut state = self.inner.state.lock().await;
        state.history.clear();
        state.last_cleanup = None;
    }
}
