//! Retry strategies: which records they govern and how long to wait.
//!
//! ```text
//! delay(k) = min(max_delay, base_delay × backoff_multiplier^k) × jitter
//! jitter   = uniform [0.5, 1.0] when enabled, 1.0 otherwise
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::retry::classifier::has_server_status;
use crate::retry::record::{ErrorKind, ErrorRecord};

/// Predicate deciding whether a strategy governs a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyMatcher {
    /// Every record.
    Any,
    /// Records of any of the listed kinds.
    Kinds { kinds: Vec<ErrorKind> },
    /// Records of `kind` whose message contains `contains` (case-insensitive).
    KindWithMessage { kind: ErrorKind, contains: String },
    /// API records carrying a 5xx status.
    ServerError,
}

impl StrategyMatcher {
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        match self {
            StrategyMatcher::Any => true,
            StrategyMatcher::Kinds { kinds } => kinds.contains(&record.kind),
            StrategyMatcher::KindWithMessage { kind, contains } => {
                record.kind == *kind
                    && record
                        .message
                        .to_lowercase()
                        .contains(&contains.to_lowercase())
            }
            StrategyMatcher::ServerError => {
                record.kind == ErrorKind::Api && has_server_status(&record.message)
            }
        }
    }
}

/// Backoff parameters for one class of failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    pub name: String,
    pub applies_if: StrategyMatcher,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl RetryStrategy {
    pub fn applies_to(&self, record: &ErrorRecord) -> bool {
        self.applies_if.matches(record)
    }

    /// Capped exponential delay for 0-indexed `attempt`, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt).floor() as u64)
    }

    /// Delay for `attempt`, jittered when the strategy asks for it.
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let mut delay = self.backoff_ms(attempt);
        if self.use_jitter {
            delay *= rng.gen_range(0.5..=1.0);
        }
        Duration::from_millis(delay.floor() as u64)
    }

    fn backoff_ms(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        raw.min(self.max_delay_ms as f64).max(0.0)
    }
}

/// Network/timeout, 5xx API, and validation strategies, in that order.
pub fn default_strategies() -> Vec<RetryStrategy> {
    vec![
        RetryStrategy {
            name: "network".to_string(),
            applies_if: StrategyMatcher::Kinds {
                kinds: vec![ErrorKind::Network, ErrorKind::Timeout],
            },
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        },
        RetryStrategy {
            name: "api".to_string(),
            applies_if: StrategyMatcher::ServerError,
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5000,
            backoff_multiplier: 1.5,
            use_jitter: true,
        },
        RetryStrategy {
            name: "validation".to_string(),
            applies_if: StrategyMatcher::Kinds {
                kinds: vec![ErrorKind::Validation],
            },
            max_retries: 1,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 1.0,
            use_jitter: false,
        },
    ]
}
