//! preload-pager: paginated list loading with look-ahead.
//!
//! A [`PaginationController`] serves pages of a remote list from an LRU page
//! cache and prefetches the pages after the one being read. Around it:
//!   - [`ErrorEngine`] classifies failures and schedules backed-off retries
//!   - [`MemoryGovernor`] watches cache footprint and sheds entries under pressure
//!   - [`AnalyticsAggregator`] turns load, cache and error events into metrics

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod memory;
pub mod pagination;
pub mod retry;

pub use analytics::AnalyticsAggregator;
pub use cache::{Page, PageCache};
pub use config::Config;
pub use error::{FetchError, LoadFailure};
pub use memory::MemoryGovernor;
pub use pagination::{DataSource, PageResult, PaginationController, PaginationState, Phase};
pub use retry::ErrorEngine;
