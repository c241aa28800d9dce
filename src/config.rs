//! Runtime configuration for preload-pager.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tuning knobs (page size, prefetch depth, memory thresholds, retry
//! strategies, performance tiers) live here.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::retry::strategy::{default_strategies, RetryStrategy};

/// Command-line arguments for the simulation binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "preload-pager",
    about = "Drive the preloading pagination cache against a synthetic data source"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Number of records served by the synthetic source.
    #[arg(long, default_value_t = 250)]
    pub total_items: usize,

    /// Override the configured page size.
    #[arg(long)]
    pub items_per_page: Option<u32>,

    /// Simulated fetch latency in milliseconds.
    #[arg(long, default_value_t = 120)]
    pub latency_ms: u64,

    /// Probability (0.0 - 1.0) that a fetch fails with a network error.
    #[arg(long, default_value_t = 0.05)]
    pub failure_rate: f64,

    /// Number of navigation steps to simulate.
    #[arg(long, default_value_t = 20)]
    pub steps: usize,

    /// Print the analytics export as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Paging and prefetch behaviour.
    pub pagination: PaginationConfig,

    /// Memory governor thresholds and monitoring.
    pub memory: MemoryConfig,

    /// Error engine and retry strategies.
    pub retry: RetryConfig,

    /// Performance rating tiers.
    pub analytics: AnalyticsConfig,
}

/// Paging and prefetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Records per page.
    pub items_per_page: u32,

    /// Number of pages to prefetch after the current one.
    pub preload_pages: usize,

    /// Maximum number of cached pages.
    pub cache_size: usize,

    /// Prefetch automatically after each navigation.
    pub background_preload: bool,

    /// Delay before each prefetch request, in milliseconds.
    pub preload_delay_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            items_per_page: 10,
            preload_pages: 2,
            cache_size: 10,
            background_preload: true,
            preload_delay_ms: 500,
        }
    }
}

impl PaginationConfig {
    pub fn preload_delay(&self) -> Duration {
        Duration::from_millis(self.preload_delay_ms)
    }
}

/// Memory ceilings in MB for each pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            low: 10.0,
            medium: 25.0,
            high: 50.0,
            critical: 100.0,
        }
    }
}

/// Memory governor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub thresholds: MemoryThresholds,

    /// Pressure check interval while monitoring, in seconds.
    pub monitor_interval_secs: u64,

    /// Number of usage samples kept for trend analysis.
    pub history_size: usize,

    /// Idle age beyond which entries are dropped under medium pressure, in seconds.
    pub max_entry_age_secs: u64,

    /// Capacity multiplier applied under high pressure.
    pub capacity_scale: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            thresholds: MemoryThresholds::default(),
            monitor_interval_secs: 30,
            history_size: 100,
            max_entry_age_secs: 5 * 60,
            capacity_scale: 0.5,
        }
    }
}

impl MemoryConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn max_entry_age(&self) -> Duration {
        Duration::from_secs(self.max_entry_age_secs)
    }
}

/// Error engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Schedule retries at all.
    pub enabled: bool,

    /// Maximum number of error records kept.
    pub max_records: usize,

    /// Window for the error-rate statistic, in seconds.
    pub error_rate_window_secs: u64,

    /// Ordered strategies; the first match governs a record.
    pub strategies: Vec<RetryStrategy>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records: 100,
            error_rate_window_secs: 60,
            strategies: default_strategies(),
        }
    }
}

impl RetryConfig {
    pub fn error_rate_window(&self) -> Duration {
        Duration::from_secs(self.error_rate_window_secs)
    }
}

/// The bar one performance tier sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    /// Maximum average load time, in milliseconds.
    pub load_time_ms: f64,
    /// Minimum cache hit rate, in percent.
    pub cache_hit_rate: f64,
    /// Maximum estimated memory usage, in MB.
    pub memory_mb: f64,
}

/// Performance tiers, best first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub excellent: TierThreshold,
    pub good: TierThreshold,
    pub fair: TierThreshold,
    pub poor: TierThreshold,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            excellent: TierThreshold {
                load_time_ms: 200.0,
                cache_hit_rate: 90.0,
                memory_mb: 10.0,
            },
            good: TierThreshold {
                load_time_ms: 500.0,
                cache_hit_rate: 75.0,
                memory_mb: 25.0,
            },
            fair: TierThreshold {
                load_time_ms: 1000.0,
                cache_hit_rate: 60.0,
                memory_mb: 50.0,
            },
            poor: TierThreshold {
                load_time_ms: 2000.0,
                cache_hit_rate: 40.0,
                memory_mb: 100.0,
            },
        }
    }
}

/// Analytics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub thresholds: PerformanceThresholds,

    /// Events retained in the log. Metrics keep counting past the cap.
    pub max_events: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            thresholds: PerformanceThresholds::default(),
            max_events: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
