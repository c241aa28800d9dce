//! Failure classification.
//!
//! The engine asks an [`ErrorClassifier`] for kind, severity and retryability.
//! [`KeywordClassifier`] reproduces the message heuristics the console has
//! always used; [`TypedClassifier`] looks at typed causes first and only
//! falls back to keywords for errors it does not recognise.

use crate::error::FetchError;
use crate::retry::record::{ErrorKind, Severity};

/// Result of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
}

/// Pluggable classification strategy.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &anyhow::Error) -> Classification;
}

/// Substring heuristics over the rendered error chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

const NON_RETRYABLE: [&str; 4] = ["unauthorized", "forbidden", "not found", "validation"];
const RETRYABLE: [&str; 3] = ["network", "timeout", "server error"];

impl KeywordClassifier {
    pub fn classify_message(&self, message: &str) -> Classification {
        let message = message.to_lowercase();
        let kind = kind_from_message(&message);
        Classification {
            kind,
            severity: severity_from_message(&message),
            retryable: retryable_from_message(kind, &message),
        }
    }
}

impl ErrorClassifier for KeywordClassifier {
    fn classify(&self, error: &anyhow::Error) -> Classification {
        self.classify_message(&format!("{error:#}"))
    }
}

fn kind_from_message(message: &str) -> ErrorKind {
    let has = |needle: &str| message.contains(needle);

    if has("network") || has("connection") || has("fetch") {
        ErrorKind::Network
    } else if has("timeout") {
        ErrorKind::Timeout
    } else if has("validation") || has("invalid") {
        ErrorKind::Validation
    } else if has("api") || has("http") {
        ErrorKind::Api
    } else {
        ErrorKind::Unknown
    }
}

fn severity_from_message(message: &str) -> Severity {
    if message.contains("critical") || message.contains("fatal") {
        Severity::Critical
    } else if message.contains("unauthorized") || message.contains("forbidden") {
        Severity::High
    } else if message.contains("timeout") || message.contains("server error") {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn retryable_from_message(kind: ErrorKind, message: &str) -> bool {
    if kind == ErrorKind::Validation || NON_RETRYABLE.iter().any(|k| message.contains(k)) {
        return false;
    }
    matches!(kind, ErrorKind::Network | ErrorKind::Timeout)
        || RETRYABLE.iter().any(|k| message.contains(k))
        || has_server_status(message)
}

/// Whether the message carries a 5xx status (`503`, `5xx`).
pub fn has_server_status(message: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| {
            if token.eq_ignore_ascii_case("5xx") {
                return true;
            }
            token.len() == 3
                && token
                    .parse::<u16>()
                    .map(|status| (500..600).contains(&status))
                    .unwrap_or(false)
        })
}

/// Classifies [`FetchError`] causes structurally, keywords otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypedClassifier {
    fallback: KeywordClassifier,
}

impl TypedClassifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorClassifier for TypedClassifier {
    fn classify(&self, error: &anyhow::Error) -> Classification {
        let Some(typed) = error.chain().find_map(|e| e.downcast_ref::<FetchError>()) else {
            return self.fallback.classify(error);
        };

        let (kind, severity, retryable) = match typed {
            FetchError::Network(_) => (ErrorKind::Network, Severity::Low, true),
            FetchError::Timeout(_) => (ErrorKind::Timeout, Severity::Medium, true),
            FetchError::Http { status, .. } => match status {
                500..=599 => (ErrorKind::Api, Severity::Medium, true),
                401 | 403 => (ErrorKind::Api, Severity::High, false),
                _ => (ErrorKind::Api, Severity::Low, false),
            },
            FetchError::Validation(_) => (ErrorKind::Validation, Severity::Low, false),
            FetchError::Unauthorized | FetchError::Forbidden => {
                (ErrorKind::Api, Severity::High, false)
            }
            FetchError::NotFound => (ErrorKind::Api, Severity::Low, false),
        };

        Classification {
            kind,
            severity,
            retryable,
        }
    }
}
