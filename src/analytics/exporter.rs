//! Prometheus export of analytics and memory metrics.

use prometheus::{Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};

use crate::analytics::aggregator::{PaginationMetrics, PerformanceRating};
use crate::memory::pressure::{MemorySnapshot, PressureLevel};

/// Gauges mirroring the latest metrics, registered in their own registry.
pub struct MetricsExporter {
    registry: Registry,
    average_load_ms: Gauge,
    cache_hit_rate: Gauge,
    page_loads: IntGauge,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    errors: IntGauge,
    preload_errors: IntGauge,
    retries: IntGauge,
    memory_mb: Gauge,
    cache_entries: IntGauge,
    pressure: IntGauge,
    rating: IntGauge,
}

impl MetricsExporter {
    pub fn new(namespace: &str) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str| -> prometheus::Result<Gauge> {
            let g = Gauge::with_opts(Opts::new(name, help).namespace(namespace))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let int_gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let g = IntGauge::with_opts(Opts::new(name, help).namespace(namespace))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        Ok(Self {
            average_load_ms: gauge("average_load_ms", "Mean page load time in milliseconds")?,
            cache_hit_rate: gauge("cache_hit_rate_percent", "Cache hit rate in percent")?,
            page_loads: int_gauge("page_loads", "Page loads observed")?,
            cache_hits: int_gauge("cache_hits", "Cache hits observed")?,
            cache_misses: int_gauge("cache_misses", "Cache misses observed")?,
            errors: int_gauge("errors", "Load and preload errors observed")?,
            preload_errors: int_gauge("preload_errors", "Preload errors observed")?,
            retries: int_gauge("retries", "Retries performed")?,
            memory_mb: gauge("memory_usage_mb", "Estimated cache memory in MB")?,
            cache_entries: int_gauge("cache_entries", "Cached pages")?,
            pressure: int_gauge("memory_pressure", "Pressure level, 0 low to 3 critical")?,
            rating: int_gauge("performance_rating", "Rating, 0 excellent to 3 poor")?,
            registry,
        })
    }

    pub fn observe_metrics(&self, metrics: &PaginationMetrics, rating: PerformanceRating) {
        self.average_load_ms.set(metrics.load_times.average_ms);
        self.cache_hit_rate.set(metrics.cache.hit_rate);
        self.page_loads.set(metrics.load_times.page_loads as i64);
        self.cache_hits.set(metrics.cache.hits as i64);
        self.cache_misses.set(metrics.cache.misses as i64);
        self.errors.set(metrics.errors.total as i64);
        self.preload_errors.set(metrics.errors.preload_errors as i64);
        self.retries.set(metrics.interactions.error_retries as i64);
        self.rating.set(rating as i64);
    }

    pub fn observe_memory(&self, snapshot: &MemorySnapshot) {
        self.memory_mb.set(snapshot.usage_mb());
        self.cache_entries.set(snapshot.cache_entry_count as i64);
        self.pressure.set(pressure_code(snapshot.pressure));
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn pressure_code(level: PressureLevel) -> i64 {
    match level {
        PressureLevel::Low => 0,
        PressureLevel::Medium => 1,
        PressureLevel::High => 2,
        PressureLevel::Critical => 3,
    }
}
