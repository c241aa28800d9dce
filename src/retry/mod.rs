//! Error classification and retry orchestration.
//!
//! - [`record`]: ErrorRecord, ErrorKind, Severity, ErrorContext
//! - [`classifier`]: the pluggable ErrorClassifier and its keyword/typed implementations
//! - [`strategy`]: RetryStrategy matching and backoff delays
//! - [`schedule`]: cancellable RetryHandle
//! - [`engine`]: ErrorEngine, the bounded record table

pub mod classifier;
pub mod engine;
pub mod record;
pub mod schedule;
pub mod strategy;

pub use classifier::{Classification, ErrorClassifier, KeywordClassifier, TypedClassifier};
pub use engine::{ErrorEngine, ErrorStats};
pub use record::{ErrorContext, ErrorId, ErrorKind, ErrorRecord, Severity};
pub use schedule::{RetryHandle, RetryOutcome};
pub use strategy::{default_strategies, RetryStrategy, StrategyMatcher};
