//! Rolling usage history, trend, and forecast.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Samples compared on each side of the trend split.
const TREND_WINDOW: usize = 5;

/// Difference in MB between window means below which usage counts as stable.
const TREND_DEAD_BAND_MB: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Projected usage in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryForecast {
    pub next_minute_mb: f64,
    pub next_five_minutes_mb: f64,
}

/// Bounded FIFO of usage samples in MB.
#[derive(Debug, Clone)]
pub struct UsageHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl UsageHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, usage_mb: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(usage_mb);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// Compare the mean of the last five samples with the five before them.
    pub fn trend(&self) -> MemoryTrend {
        let n = self.samples.len();
        if n <= TREND_WINDOW {
            return MemoryTrend::Stable;
        }
        let recent = mean(self.samples.range(n - TREND_WINDOW..));
        let older_start = n.saturating_sub(2 * TREND_WINDOW);
        let older = mean(self.samples.range(older_start..n - TREND_WINDOW));

        let diff = recent - older;
        if diff > TREND_DEAD_BAND_MB {
            MemoryTrend::Increasing
        } else if diff < -TREND_DEAD_BAND_MB {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }

    /// Linear extrapolation of the last five samples.
    ///
    /// `samples_per_minute` converts the per-sample slope into time. Returns
    /// zeros until five samples exist. Forecasts never go below zero.
    pub fn forecast(&self, samples_per_minute: f64) -> MemoryForecast {
        let n = self.samples.len();
        if n < TREND_WINDOW {
            return MemoryForecast::default();
        }
        let window: Vec<f64> = self.samples.range(n - TREND_WINDOW..).copied().collect();
        let first = window[0];
        let last = window[TREND_WINDOW - 1];
        let slope = (last - first) / (TREND_WINDOW - 1) as f64;
        let per_minute = slope * samples_per_minute;

        MemoryForecast {
            next_minute_mb: (last + per_minute).max(0.0),
            next_five_minutes_mb: (last + 5.0 * per_minute).max(0.0),
        }
    }
}

fn mean<'a>(values: impl ExactSizeIterator<Item = &'a f64>) -> f64 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }
    values.sum::<f64>() / len as f64
}
