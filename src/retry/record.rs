//! Error records and their taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Collision-free record identifier.
pub type ErrorId = Uuid;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Api,
    Validation,
    Timeout,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How bad it is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Where a failure happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub component: String,
    pub action: String,
    pub page: Option<u32>,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
            page: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// A classified failure and its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub context: ErrorContext,
    pub retryable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: Instant,
    pub last_retry_at: Option<Instant>,
    pub resolved: bool,
    pub resolved_at: Option<Instant>,

    /// Insertion order, breaks timestamp ties when trimming the table.
    pub(crate) seq: u64,
}

impl ErrorRecord {
    /// Whether another retry may still be scheduled.
    pub fn can_retry(&self) -> bool {
        self.retryable && !self.resolved && self.retry_count < self.max_retries
    }

    /// Retries used up without a resolution.
    pub fn is_exhausted(&self) -> bool {
        !self.resolved && self.retry_count >= self.max_retries
    }
}
