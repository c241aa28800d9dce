//! Prefetch planning: which pages to fetch ahead of the reader.
//!
//! Strategy: a forward window. After landing on page `p`, pages
//! `p+1 ..= p+preload_pages` that are not cached yet are fetched one by one,
//! nearest first. A planned page stops being wanted as soon as it leaves the
//! window of the page the reader is on.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache::Page;

/// A page to fetch ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefetchRequest {
    pub page: Page,
    /// Closer to the current page = higher.
    pub priority: f64,
}

/// Decides which pages are worth prefetching.
#[derive(Debug, Clone, Copy)]
pub struct Prefetcher {
    preload_pages: u32,
}

impl Prefetcher {
    pub fn new(preload_pages: usize) -> Self {
        Self {
            preload_pages: u32::try_from(preload_pages).unwrap_or(u32::MAX),
        }
    }

    pub fn preload_pages(&self) -> u32 {
        self.preload_pages
    }

    /// Order uncached `candidates` for a reader on `current_page`.
    ///
    /// Candidates outside the window or past `total_pages` are dropped.
    pub fn plan(
        &self,
        current_page: Page,
        total_pages: u32,
        candidates: impl IntoIterator<Item = Page>,
    ) -> Vec<PrefetchRequest> {
        let mut requests: Vec<PrefetchRequest> = candidates
            .into_iter()
            .filter(|page| self.in_window(*page, current_page, total_pages))
            .map(|page| PrefetchRequest {
                page,
                priority: 100.0 - f64::from(page - current_page),
            })
            .collect();

        requests.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        requests.dedup_by_key(|r| r.page);
        requests
    }

    /// Whether `page` is still wanted by a reader on `current_page`.
    pub fn in_window(&self, page: Page, current_page: Page, total_pages: u32) -> bool {
        page > current_page
            && page <= total_pages
            && page - current_page <= self.preload_pages
    }
}

/// Counters for prefetch activity.
#[derive(Debug, Default)]
pub struct PrefetchCounters {
    planned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    discarded: AtomicU64,
    cancelled: AtomicU64,
}

impl PrefetchCounters {
    pub fn planned(&self, n: usize) {
        self.planned.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Page got cached by someone else before its turn.
    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Result arrived after it was superseded.
    pub fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// A sequence stopped early.
    pub fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PrefetchStats {
        PrefetchStats {
            planned: self.planned.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            cancelled_sequences: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchStats {
    pub planned: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub discarded: u64,
    pub cancelled_sequences: u64,
}
