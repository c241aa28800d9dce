//! Page cache management.
//!
//! This module contains the cache data structures and replacement policy:
//! - [`entry`]: CacheEntry, Origin, Page, the Record bound
//! - [`manager`]: PageCache, the page-keyed LRU store and its statistics
//! - [`evictor`]: LRU victim selection and idle-page scans
//! - [`shared`]: Shared handles and the ManagedCache trait used by the memory governor

pub mod entry;
pub mod evictor;
pub mod manager;
pub mod shared;

pub use entry::{CacheEntry, Origin, Page, Record};
pub use manager::{CacheStats, PageCache};
pub use shared::{new_shared_cache, ManagedCache, SharedPageCache};
