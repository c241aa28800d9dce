//! Pagination state and derived views.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::Page;
use crate::error::LoadFailure;

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No direct load has completed yet.
    Initial,
    /// A direct load is in flight.
    Loading,
    /// Only prefetches are in flight.
    Preloading,
    /// The last direct load failed for good.
    Error,
    Idle,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initial => "initial",
            Phase::Loading => "loading",
            Phase::Preloading => "preloading",
            Phase::Error => "error",
            Phase::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Everything the UI reads. Owned by one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationState {
    /// Always within `[1, max(total_pages, 1)]`.
    pub current_page: Page,
    pub total_pages: u32,
    pub total_items: u64,
    pub items_per_page: u32,
    /// Pages fetched or served on direct request. Disjoint from `preloaded_pages`.
    pub loaded_pages: BTreeSet<Page>,
    pub preloaded_pages: BTreeSet<Page>,
    pub phase: Phase,
    pub error: Option<LoadFailure>,
    /// Retries of the current direct load; reset on success.
    pub retry_count: u32,
}

impl PaginationState {
    pub fn new(items_per_page: u32) -> Self {
        Self {
            current_page: 1,
            total_pages: 0,
            total_items: 0,
            items_per_page: items_per_page.max(1),
            loaded_pages: BTreeSet::new(),
            preloaded_pages: BTreeSet::new(),
            phase: Phase::Initial,
            error: None,
            retry_count: 0,
        }
    }

    pub fn in_bounds(&self, page: Page) -> bool {
        page >= 1 && page <= self.total_pages
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn has_prev_page(&self) -> bool {
        self.current_page > 1
    }

    pub fn mark_loaded(&mut self, page: Page) {
        self.preloaded_pages.remove(&page);
        self.loaded_pages.insert(page);
    }

    /// Record a prefetched page unless it was already loaded directly.
    pub fn mark_preloaded(&mut self, page: Page) {
        if !self.loaded_pages.contains(&page) {
            self.preloaded_pages.insert(page);
        }
    }

    pub fn forget(&mut self, page: Page) {
        self.loaded_pages.remove(&page);
        self.preloaded_pages.remove(&page);
    }

    pub fn forget_all(&mut self) {
        self.loaded_pages.clear();
        self.preloaded_pages.clear();
    }

    /// Drop set members the cache no longer holds.
    pub fn retain_cached(&mut self, cached: impl Fn(Page) -> bool) {
        self.loaded_pages.retain(|p| cached(*p));
        self.preloaded_pages.retain(|p| cached(*p));
    }

    /// Adopt server totals. `total_pages == 0` with items present is derived
    /// from the page size. Keeps `current_page` and the page sets in range.
    pub fn apply_totals(&mut self, total_items: u64, total_pages: u32) {
        self.total_items = total_items;
        self.total_pages = if total_pages == 0 && total_items > 0 {
            u32::try_from(total_items.div_ceil(u64::from(self.items_per_page)))
                .unwrap_or(u32::MAX)
        } else {
            total_pages
        };
        self.current_page = self.current_page.clamp(1, self.total_pages.max(1));
        let total = self.total_pages;
        self.loaded_pages.retain(|p| *p <= total);
        self.preloaded_pages.retain(|p| *p <= total);
    }

    pub fn info(&self) -> PaginationInfo {
        let ipp = u64::from(self.items_per_page);
        let start_index = u64::from(self.current_page - 1) * ipp;
        let end_index = (start_index + ipp).min(self.total_items);
        PaginationInfo {
            current_page: self.current_page,
            total_pages: self.total_pages,
            total_items: self.total_items,
            items_per_page: self.items_per_page,
            start_index,
            end_index,
            showing_items: end_index.saturating_sub(start_index),
            has_next_page: self.has_next_page(),
            has_prev_page: self.has_prev_page(),
        }
    }

    /// Up to `max_visible` consecutive page numbers around the current page.
    pub fn page_range(&self, max_visible: u32) -> Vec<Page> {
        if self.total_pages == 0 || max_visible == 0 {
            return Vec::new();
        }
        let half = max_visible / 2;
        let mut start = self.current_page.saturating_sub(half).max(1);
        let end = (start + max_visible - 1).min(self.total_pages);
        if end - start + 1 < max_visible {
            start = (end + 1).saturating_sub(max_visible).max(1);
        }
        (start..=end).collect()
    }
}

/// Item window of the current page. Indices are 0-based, `end_index` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub current_page: Page,
    pub total_pages: u32,
    pub total_items: u64,
    pub items_per_page: u32,
    pub start_index: u64,
    pub end_index: u64,
    pub showing_items: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}
