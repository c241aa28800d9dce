//! Typed errors.

use std::time::Duration;

use thiserror::Error;

use crate::cache::Page;
use crate::retry::{ErrorId, ErrorKind, Severity};

/// Failures a data source can report with a typed cause.
///
/// Sources may return any `anyhow::Error`; wrapping one of these lets
/// [`TypedClassifier`](crate::retry::TypedClassifier) classify it without
/// looking at the message.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout after {0:?}")]
    Timeout(Duration),

    #[error("api error: HTTP {status} {message}")]
    Http { status: u16, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,
}

/// A direct load that failed for good, as exposed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load page {page}: {message}")]
pub struct LoadFailure {
    pub page: Page,
    pub message: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Record in the error engine, if one was created.
    pub error_id: Option<ErrorId>,
    /// Retries performed before giving up.
    pub retry_count: u32,
}
