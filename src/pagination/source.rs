//! The data source contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::Page;

/// One page as returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Authoritative item count.
    pub total_items: u64,
    /// Authoritative page count; 0 lets the controller derive it.
    pub total_pages: u32,
}

/// Fetches pages. Implemented by the application; transport, timeouts and
/// transport-level retries are the source's business.
#[async_trait]
pub trait DataSource<T>: Send + Sync {
    async fn fetch_page(&self, page: Page, items_per_page: u32) -> anyhow::Result<PageResult<T>>;
}
