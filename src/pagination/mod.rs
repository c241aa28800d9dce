//! Preloading pagination.
//!
//! - [`state`]: PaginationState, Phase and display helpers
//! - [`source`]: the DataSource seam and PageResult
//! - [`prefetcher`]: prefetch window planning and counters
//! - [`controller`]: PaginationController, loads, retries and prefetch

pub mod controller;
pub mod prefetcher;
pub mod source;
pub mod state;

pub use controller::{ControllerBuilder, PaginationController};
pub use prefetcher::{PrefetchStats, Prefetcher};
pub use source::{DataSource, PageResult};
pub use state::{PaginationInfo, PaginationState, Phase};
