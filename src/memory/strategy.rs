//! Cleanup strategies, in priority order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::memory::pressure::PressureLevel;

/// One cleanup action the governor can take against its caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    ClearOldEntries,
    ReduceCacheSize,
    ClearPreloaded,
    ForceGc,
    ClearAll,
}

impl CleanupStrategy {
    /// Every strategy, highest priority first.
    pub const PRIORITY: [CleanupStrategy; 5] = [
        CleanupStrategy::ClearOldEntries,
        CleanupStrategy::ReduceCacheSize,
        CleanupStrategy::ClearPreloaded,
        CleanupStrategy::ForceGc,
        CleanupStrategy::ClearAll,
    ];

    /// The pressure level this strategy answers.
    pub fn level(self) -> PressureLevel {
        match self {
            CleanupStrategy::ClearOldEntries => PressureLevel::Medium,
            CleanupStrategy::ReduceCacheSize | CleanupStrategy::ClearPreloaded => {
                PressureLevel::High
            }
            CleanupStrategy::ForceGc | CleanupStrategy::ClearAll => PressureLevel::Critical,
        }
    }

    pub fn applies_to(self, pressure: PressureLevel) -> bool {
        self.level() == pressure
    }

    pub fn description(self) -> &'static str {
        match self {
            CleanupStrategy::ClearOldEntries => "Clear cache entries idle past the maximum age",
            CleanupStrategy::ReduceCacheSize => "Reduce cache capacity",
            CleanupStrategy::ClearPreloaded => "Clear all preloaded pages",
            CleanupStrategy::ForceGc => "Request garbage collection",
            CleanupStrategy::ClearAll => "Clear all caches as last resort",
        }
    }

    /// Pick the strategy for this check.
    ///
    /// Starts at the first applicable strategy. When the previous check at
    /// the same pressure ran `previous`, moves on to the next applicable one,
    /// wrapping back to the first.
    pub fn select(
        pressure: PressureLevel,
        previous: Option<(PressureLevel, CleanupStrategy)>,
    ) -> Option<CleanupStrategy> {
        let applicable: Vec<CleanupStrategy> = Self::PRIORITY
            .into_iter()
            .filter(|s| s.applies_to(pressure))
            .collect();
        let first = applicable.first().copied()?;

        match previous {
            Some((level, last)) if level == pressure => applicable
                .iter()
                .position(|s| *s == last)
                .and_then(|i| applicable.get(i + 1))
                .copied()
                .or(Some(first)),
            _ => Some(first),
        }
    }
}

impl fmt::Display for CleanupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CleanupStrategy::ClearOldEntries => "clear_old_entries",
            CleanupStrategy::ReduceCacheSize => "reduce_cache_size",
            CleanupStrategy::ClearPreloaded => "clear_preloaded",
            CleanupStrategy::ForceGc => "force_gc",
            CleanupStrategy::ClearAll => "clear_all",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_pressure_has_no_strategy() {
        assert_eq!(CleanupStrategy::select(PressureLevel::Low, None), None);
    }

    #[test]
    fn test_first_applicable_wins() {
        assert_eq!(
            CleanupStrategy::select(PressureLevel::Medium, None),
            Some(CleanupStrategy::ClearOldEntries)
        );
        assert_eq!(
            CleanupStrategy::select(PressureLevel::High, None),
            Some(CleanupStrategy::ReduceCacheSize)
        );
        assert_eq!(
            CleanupStrategy::select(PressureLevel::Critical, None),
            Some(CleanupStrategy::ForceGc)
        );
    }

    #[test]
    fn test_escalation_within_level() {
        let high = PressureLevel::High;
        let next = CleanupStrategy::select(high, Some((high, CleanupStrategy::ReduceCacheSize)));
        assert_eq!(next, Some(CleanupStrategy::ClearPreloaded));

        let wrapped = CleanupStrategy::select(high, Some((high, CleanupStrategy::ClearPreloaded)));
        assert_eq!(wrapped, Some(CleanupStrategy::ReduceCacheSize));

        // A different level starts over.
        let fresh = CleanupStrategy::select(
            PressureLevel::Critical,
            Some((high, CleanupStrategy::ReduceCacheSize)),
        );
        assert_eq!(fresh, Some(CleanupStrategy::ForceGc));
    }
}
