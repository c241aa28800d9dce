//! Performance analytics.
//!
//! - [`event`]: the closed AnalyticsEvent type
//! - [`aggregator`]: AnalyticsAggregator, incremental metrics and rating
//! - [`exporter`]: Prometheus gauges

pub mod aggregator;
pub mod event;
pub mod exporter;

pub use aggregator::{AnalyticsAggregator, PaginationMetrics, PerformanceRating, PerformanceSummary};
pub use event::{AnalyticsEvent, EventKind, EventType, InteractionKind, LoadSource};
pub use exporter::MetricsExporter;
