//! Pressure levels and memory snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MemoryThresholds;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Coarse classification of estimated memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    /// Map usage in MB onto the thresholds. Each threshold is an inclusive ceiling.
    pub fn from_usage(usage_mb: f64, thresholds: &MemoryThresholds) -> Self {
        if usage_mb <= thresholds.low {
            PressureLevel::Low
        } else if usage_mb <= thresholds.medium {
            PressureLevel::Medium
        } else if usage_mb <= thresholds.high {
            PressureLevel::High
        } else {
            PressureLevel::Critical
        }
    }

    pub fn recommendations(self) -> Vec<String> {
        let lines: &[&str] = match self {
            PressureLevel::Low => &[],
            PressureLevel::Medium => &[
                "Consider clearing old cache entries",
                "Monitor memory usage closely",
            ],
            PressureLevel::High => &[
                "Clear preloaded pages to free memory",
                "Reduce cache size",
                "Consider lazy loading",
            ],
            PressureLevel::Critical => &[
                "Clear all caches immediately",
                "Apply aggressive memory cleanup",
                "Consider reducing page size",
            ],
        };
        lines.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureLevel::Low => "low",
            PressureLevel::Medium => "medium",
            PressureLevel::High => "high",
            PressureLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Usage of one registered cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheUsage {
    pub name: String,
    pub entries: usize,
    pub max_entries: usize,
    pub estimated_bytes: usize,
}

/// Derived view over every registered cache. Never stored by the governor
/// except as a usage sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub estimated_usage_bytes: usize,
    pub cache_entry_count: usize,
    pub pressure: PressureLevel,
    pub caches: Vec<CacheUsage>,
    pub recommendations: Vec<String>,
}

impl MemorySnapshot {
    pub fn from_caches(caches: Vec<CacheUsage>, thresholds: &MemoryThresholds) -> Self {
        let estimated_usage_bytes = caches.iter().map(|c| c.estimated_bytes).sum();
        let cache_entry_count = caches.iter().map(|c| c.entries).sum();
        let pressure = PressureLevel::from_usage(bytes_to_mb(estimated_usage_bytes), thresholds);
        Self {
            estimated_usage_bytes,
            cache_entry_count,
            pressure,
            caches,
            recommendations: pressure.recommendations(),
        }
    }

    pub fn usage_mb(&self) -> f64 {
        bytes_to_mb(self.estimated_usage_bytes)
    }
}

pub fn bytes_to_mb(bytes: usize) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_inclusive_ceilings() {
        let t = MemoryThresholds::default();
        assert_eq!(PressureLevel::from_usage(0.0, &t), PressureLevel::Low);
        assert_eq!(PressureLevel::from_usage(10.0, &t), PressureLevel::Low);
        assert_eq!(PressureLevel::from_usage(10.5, &t), PressureLevel::Medium);
        assert_eq!(PressureLevel::from_usage(50.0, &t), PressureLevel::High);
        assert_eq!(PressureLevel::from_usage(50.1, &t), PressureLevel::Critical);
        assert_eq!(PressureLevel::from_usage(500.0, &t), PressureLevel::Critical);
    }

    #[test]
    fn test_snapshot_sums_caches() {
        let mb = 1024 * 1024;
        let caches = vec![
            CacheUsage {
                name: "guests".into(),
                entries: 4,
                max_entries: 10,
                estimated_bytes: 8 * mb,
            },
            CacheUsage {
                name: "events".into(),
                entries: 2,
                max_entries: 10,
                estimated_bytes: 4 * mb,
            },
        ];
        let snapshot = MemorySnapshot::from_caches(caches, &MemoryThresholds::default());
        assert_eq!(snapshot.cache_entry_count, 6);
        assert_eq!(snapshot.usage_mb(), 12.0);
        assert_eq!(snapshot.pressure, PressureLevel::Medium);
        assert_eq!(snapshot.recommendations.len(), 2);
    }
}
