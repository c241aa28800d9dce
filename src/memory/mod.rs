//! Memory pressure detection and cleanup.
//!
//! - [`pressure`]: PressureLevel, MemorySnapshot
//! - [`history`]: rolling usage samples, trend and forecast
//! - [`strategy`]: CleanupStrategy priority and selection
//! - [`governor`]: MemoryGovernor, the cache registry and monitor loop

pub mod governor;
pub mod history;
pub mod pressure;
pub mod strategy;

pub use governor::{
    CleanupOutcome, GcHook, MemoryGovernor, MemoryReport, OptimizeResult, PressureCheck,
};
pub use history::{MemoryForecast, MemoryTrend, UsageHistory};
pub use pressure::{CacheUsage, MemorySnapshot, PressureLevel};
pub use strategy::CleanupStrategy;
