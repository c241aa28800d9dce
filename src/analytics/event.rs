//! Analytics events.
//!
//! One closed variant per event type, each with its own payload.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::Page;

/// Which load path an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Load,
    Preload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    PageChange,
    PreloadTrigger,
    Refresh,
    Retry,
}

/// Event type without payload, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageLoad,
    Preload,
    CacheHit,
    CacheMiss,
    Error,
    Interaction,
    MemoryUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PageLoad {
        page: Page,
        duration_ms: f64,
        initial: bool,
    },
    Preload {
        page: Page,
        duration_ms: f64,
    },
    CacheHit {
        page: Page,
    },
    CacheMiss {
        page: Page,
    },
    Error {
        page: Page,
        source: LoadSource,
        message: String,
    },
    Interaction {
        kind: InteractionKind,
        page: Option<Page>,
    },
    MemoryUsage {
        usage_bytes: usize,
        cache_entries: usize,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::PageLoad { .. } => EventType::PageLoad,
            EventKind::Preload { .. } => EventType::Preload,
            EventKind::CacheHit { .. } => EventType::CacheHit,
            EventKind::CacheMiss { .. } => EventType::CacheMiss,
            EventKind::Error { .. } => EventType::Error,
            EventKind::Interaction { .. } => EventType::Interaction,
            EventKind::MemoryUsage { .. } => EventType::MemoryUsage,
        }
    }

    pub fn page(&self) -> Option<Page> {
        match self {
            EventKind::PageLoad { page, .. }
            | EventKind::Preload { page, .. }
            | EventKind::CacheHit { page }
            | EventKind::CacheMiss { page }
            | EventKind::Error { page, .. } => Some(*page),
            EventKind::Interaction { page, .. } => *page,
            EventKind::MemoryUsage { .. } => None,
        }
    }
}

/// A timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Wall-clock time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl AnalyticsEvent {
    /// Stamp `kind` with the current wall-clock time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp_ms: now_ms(),
            kind,
        }
    }

    pub fn at(timestamp_ms: u64, kind: EventKind) -> Self {
        Self { timestamp_ms, kind }
    }

    pub fn page_load(page: Page, duration: Duration, initial: bool) -> Self {
        Self::now(EventKind::PageLoad {
            page,
            duration_ms: millis(duration),
            initial,
        })
    }

    pub fn preload(page: Page, duration: Duration) -> Self {
        Self::now(EventKind::Preload {
            page,
            duration_ms: millis(duration),
        })
    }

    pub fn cache_hit(page: Page) -> Self {
        Self::now(EventKind::CacheHit { page })
    }

    pub fn cache_miss(page: Page) -> Self {
        Self::now(EventKind::CacheMiss { page })
    }

    pub fn error(source: LoadSource, page: Page, message: impl Into<String>) -> Self {
        Self::now(EventKind::Error {
            page,
            source,
            message: message.into(),
        })
    }

    pub fn interaction(kind: InteractionKind, page: Option<Page>) -> Self {
        Self::now(EventKind::Interaction { kind, page })
    }

    pub fn memory_usage(usage_bytes: usize, cache_entries: usize) -> Self {
        Self::now(EventKind::MemoryUsage {
            usage_bytes,
            cache_entries,
        })
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn page(&self) -> Option<Page> {
        self.kind.page()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
