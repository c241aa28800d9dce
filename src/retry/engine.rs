//! Error engine: classifies failures, keeps a bounded record table, and
//! schedules retries with backoff.
//!
//! One engine may be shared by several controllers. Record ids are UUID v4
//! and retry timers are keyed per record, so callers never clobber each
//! other's pending retries.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::retry::classifier::{ErrorClassifier, KeywordClassifier};
use crate::retry::record::{ErrorContext, ErrorId, ErrorKind, ErrorRecord, Severity};
use crate::retry::schedule::RetryHandle;
use crate::retry::strategy::RetryStrategy;

/// Aggregate view over the record table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: usize,
    pub unresolved: usize,
    pub resolved: usize,
    pub by_kind: HashMap<ErrorKind, usize>,
    pub by_severity: HashMap<Severity, usize>,
    pub retryable: usize,
    /// Unresolved records that have been retried at least once.
    pub retrying: usize,
    /// Records created within the error-rate window.
    pub error_rate: usize,
    /// Records ever handled, including trimmed ones.
    pub total_handled: u64,
}

#[derive(Default)]
struct ErrorTable {
    records: HashMap<ErrorId, ErrorRecord>,
    timers: HashMap<ErrorId, AbortHandle>,
    next_seq: u64,
    total_handled: u64,
}

impl ErrorTable {
    fn cancel_timer(&mut self, id: &ErrorId) -> bool {
        match self.timers.remove(id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    fn increment(&mut self, id: &ErrorId) -> Option<u32> {
        let record = self.records.get_mut(id)?;
        if record.resolved {
            return None;
        }
        record.retry_count += 1;
        record.last_retry_at = Some(Instant::now());
        Some(record.retry_count)
    }

    /// Drop the oldest records until the table fits `max_records`.
    fn trim(&mut self, max_records: usize) {
        while self.records.len() > max_records {
            let oldest = self
                .records
                .values()
                .min_by_key(|r| (r.created_at, r.seq))
                .map(|r| r.id);
            let Some(oldest) = oldest else { break };
            self.records.remove(&oldest);
            self.cancel_timer(&oldest);
            debug!(id = %oldest, "Trimmed error record");
        }
    }
}

struct EngineInner {
    config: RetryConfig,
    classifier: Box<dyn ErrorClassifier>,
    table: Mutex<ErrorTable>,
}

/// The error/retry engine. Cheap to clone; clones share the record table.
#[derive(Clone)]
pub struct ErrorEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ErrorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Default for ErrorEngine {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl ErrorEngine {
    /// Create an engine using the keyword classifier.
    pub fn new(config: RetryConfig) -> Self {
        Self::with_classifier(config, KeywordClassifier)
    }

    pub fn with_classifier(
        config: RetryConfig,
        classifier: impl ErrorClassifier + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                classifier: Box::new(classifier),
                table: Mutex::new(ErrorTable::default()),
            }),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.inner.config
    }

    /// Classify a failure and record it.
    pub async fn handle(&self, err: &anyhow::Error, context: ErrorContext) -> ErrorRecord {
        let classification = self.inner.classifier.classify(err);
        let message = format!("{err:#}");

        let mut table = self.inner.table.lock().await;
        let seq = table.next_seq;
        table.next_seq += 1;
        table.total_handled += 1;

        let mut record = ErrorRecord {
            id: Uuid::new_v4(),
            kind: classification.kind,
            severity: classification.severity,
            message,
            context,
            retryable: classification.retryable,
            retry_count: 0,
            max_retries: 0,
            created_at: Instant::now(),
            last_retry_at: None,
            resolved: false,
            resolved_at: None,
            seq,
        };
        record.max_retries = self
            .strategy_for(&record)
            .map(|s| s.max_retries)
            .unwrap_or(0);

        log_record(&record);

        table.records.insert(record.id, record.clone());
        table.trim(self.inner.config.max_records);
        record
    }

    /// The first strategy that governs `record`.
    pub fn strategy_for(&self, record: &ErrorRecord) -> Option<&RetryStrategy> {
        self.inner
            .config
            .strategies
            .iter()
            .find(|s| s.applies_to(record))
    }

    pub async fn get(&self, id: &ErrorId) -> Option<ErrorRecord> {
        self.inner.table.lock().await.records.get(id).cloned()
    }

    /// Schedule the next retry for a record.
    ///
    /// Returns `None` when retries are disabled, the record is unknown,
    /// resolved, not retryable, out of retries, or no strategy applies. A
    /// retry already pending for the same record is replaced.
    pub async fn schedule_retry(&self, id: &ErrorId) -> Option<RetryHandle> {
        if !self.inner.config.enabled {
            return None;
        }

        let mut table = self.inner.table.lock().await;
        let record = table.records.get(id)?;
        if !record.can_retry() {
            if record.is_exhausted() {
                info!(id = %id, retries = record.retry_count, "Max retries reached");
            }
            return None;
        }
        let strategy = self.strategy_for(record)?;
        let attempt = record.retry_count;
        let delay = {
            let mut rng = rand::thread_rng();
            strategy.delay_for(attempt, &mut rng)
        };

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let record_id = *id;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = {
                let mut table = inner.table.lock().await;
                table.timers.remove(&record_id);
                table.increment(&record_id)
            };
            if let Some(retry_count) = fired {
                debug!(id = %record_id, retry_count, "Retry fired");
                let _ = tx.send(retry_count);
            }
        });

        table.cancel_timer(id);
        table.timers.insert(*id, task.abort_handle());

        debug!(
            id = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            strategy = %strategy.name,
            "Scheduled retry"
        );

        Some(RetryHandle::new(*id, attempt, delay, rx, task.abort_handle()))
    }

    /// Count a retry performed outside the scheduler. Cancels any pending
    /// scheduled retry for the record. Returns the new retry count.
    pub async fn retry(&self, id: &ErrorId) -> Option<u32> {
        let mut table = self.inner.table.lock().await;
        table.cancel_timer(id);
        table.increment(id)
    }

    /// Mark a record resolved and revoke its pending retry.
    ///
    /// Idempotent: returns true only for the call that resolved it.
    pub async fn resolve(&self, id: &ErrorId) -> bool {
        let mut table = self.inner.table.lock().await;
        let Some(record) = table.records.get_mut(id) else {
            return false;
        };
        if record.resolved {
            return false;
        }
        record.resolved = true;
        record.resolved_at = Some(Instant::now());
        let retries = record.retry_count;
        table.cancel_timer(id);
        info!(id = %id, retries, "Error resolved");
        true
    }

    /// Whether a retry is currently pending for the record.
    pub async fn has_pending_retry(&self, id: &ErrorId) -> bool {
        self.inner.table.lock().await.timers.contains_key(id)
    }

    pub async fn all(&self) -> Vec<ErrorRecord> {
        let table = self.inner.table.lock().await;
        let mut records: Vec<ErrorRecord> = table.records.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    pub async fn by_kind(&self, kind: ErrorKind) -> Vec<ErrorRecord> {
        self.filtered(|r| r.kind == kind).await
    }

    pub async fn by_severity(&self, severity: Severity) -> Vec<ErrorRecord> {
        self.filtered(|r| r.severity == severity).await
    }

    pub async fn unresolved(&self) -> Vec<ErrorRecord> {
        self.filtered(|r| !r.resolved).await
    }

    async fn filtered(&self, keep: impl Fn(&ErrorRecord) -> bool) -> Vec<ErrorRecord> {
        let mut records = self.all().await;
        records.retain(|r| keep(r));
        records
    }

    pub async fn len(&self) -> usize {
        self.inner.table.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> ErrorStats {
        let table = self.inner.table.lock().await;
        let window = self.inner.config.error_rate_window();
        let now = Instant::now();

        let mut stats = ErrorStats {
            total: table.records.len(),
            total_handled: table.total_handled,
            ..Default::default()
        };
        for record in table.records.values() {
            if record.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
                if record.retry_count > 0 {
                    stats.retrying += 1;
                }
            }
            if record.retryable {
                stats.retryable += 1;
            }
            if now.saturating_duration_since(record.created_at) < window {
                stats.error_rate += 1;
            }
            *stats.by_kind.entry(record.kind).or_default() += 1;
            *stats.by_severity.entry(record.severity).or_default() += 1;
        }
        stats
    }

    /// Drop every record and revoke every pending retry.
    pub async fn clear(&self) {
        let mut table = self.inner.table.lock().await;
        for (_, timer) in table.timers.drain() {
            timer.abort();
        }
        table.records.clear();
    }

    /// End of lifecycle: same as [`ErrorEngine::clear`].
    pub async fn destroy(&self) {
        self.clear().await;
    }
}

fn log_record(record: &ErrorRecord) {
    match record.severity {
        Severity::Critical => error!(
            id = %record.id,
            kind = %record.kind,
            component = %record.context.component,
            action = %record.context.action,
            page = record.context.page,
            retryable = record.retryable,
            "[CRITICAL] {}", record.message
        ),
        Severity::High => warn!(
            id = %record.id,
            kind = %record.kind,
            component = %record.context.component,
            action = %record.context.action,
            page = record.context.page,
            retryable = record.retryable,
            "[HIGH] {}", record.message
        ),
        severity => info!(
            id = %record.id,
            kind = %record.kind,
            severity = %severity,
            component = %record.context.component,
            action = %record.context.action,
            page = record.context.page,
            retryable = record.retryable,
            "{}", record.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::schedule::RetryOutcome;
    use crate::retry::strategy::{RetryStrategy, StrategyMatcher};
    use std::time::Duration;

    fn ctx() -> ErrorContext {
        ErrorContext::new("guests", "load").with_page(2)
    }

    fn fixed_strategy(max_retries: u32) -> RetryConfig {
        RetryConfig {
            strategies: vec![RetryStrategy {
                name: "fixed".into(),
                applies_if: StrategyMatcher::Any,
                max_retries,
                base_delay_ms: 100,
                max_delay_ms: 1000,
                backoff_multiplier: 2.0,
                use_jitter: false,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_handle_classifies_and_sets_max_retries() {
        let engine = ErrorEngine::default();
        let record = engine
            .handle(&anyhow::anyhow!("network connection lost"), ctx())
            .await;

        assert_eq!(record.kind, ErrorKind::Network);
        assert!(record.retryable);
        assert_eq!(record.max_retries, 3);
        assert_eq!(record.context.page, Some(2));
        assert!(!record.resolved);

        let record = engine.handle(&anyhow::anyhow!("validation failed"), ctx()).await;
        assert_eq!(record.kind, ErrorKind::Validation);
        assert!(!record.retryable);
        assert!(engine.schedule_retry(&record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let engine = ErrorEngine::default();
        let a = engine.handle(&anyhow::anyhow!("timeout"), ctx()).await;
        let b = engine.handle(&anyhow::anyhow!("timeout"), ctx()).await;
        assert_ne!(a.id, b.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_max() {
        let engine = ErrorEngine::new(fixed_strategy(2));
        let record = engine.handle(&anyhow::anyhow!("network down"), ctx()).await;

        let first = engine.schedule_retry(&record.id).await.unwrap();
        assert_eq!(first.delay(), Duration::from_millis(100));
        assert_eq!(first.wait().await, RetryOutcome::Fired { retry_count: 1 });

        let second = engine.schedule_retry(&record.id).await.unwrap();
        assert_eq!(second.delay(), Duration::from_millis(200));
        assert_eq!(second.wait().await, RetryOutcome::Fired { retry_count: 2 });

        assert!(engine.schedule_retry(&record.id).await.is_none());
        let record = engine.get(&record.id).await.unwrap();
        assert!(record.is_exhausted());
        assert!(!record.resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_cancels_pending_retry() {
        let engine = ErrorEngine::new(fixed_strategy(3));
        let record = engine.handle(&anyhow::anyhow!("network down"), ctx()).await;

        let handle = engine.schedule_retry(&record.id).await.unwrap();
        assert!(engine.has_pending_retry(&record.id).await);

        assert!(engine.resolve(&record.id).await);
        assert!(!engine.resolve(&record.id).await);
        assert_eq!(handle.wait().await, RetryOutcome::Cancelled);

        let record = engine.get(&record.id).await.unwrap();
        assert!(record.resolved);
        assert_eq!(record.retry_count, 0);
        assert!(!engine.has_pending_retry(&record.id).await);
        assert!(engine.schedule_retry(&record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_table_is_bounded_oldest_first() {
        let config = RetryConfig {
            max_records: 3,
            ..Default::default()
        };
        let engine = ErrorEngine::new(config);

        let mut ids = Vec::new();
        for i in 0..5 {
            let record = engine
                .handle(&anyhow::anyhow!("api error {i}"), ctx())
                .await;
            ids.push(record.id);
        }

        assert_eq!(engine.len().await, 3);
        assert!(engine.get(&ids[0]).await.is_none());
        assert!(engine.get(&ids[1]).await.is_none());
        assert!(engine.get(&ids[4]).await.is_some());
        assert_eq!(engine.stats().await.total_handled, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_error_rate_window() {
        let engine = ErrorEngine::default();
        let a = engine.handle(&anyhow::anyhow!("network down"), ctx()).await;
        engine.handle(&anyhow::anyhow!("401 unauthorized"), ctx()).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        engine.handle(&anyhow::anyhow!("request timeout"), ctx()).await;
        engine.resolve(&a.id).await;

        let stats = engine.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.error_rate, 1);
        assert_eq!(stats.by_kind.get(&ErrorKind::Network), Some(&1));
        assert_eq!(stats.by_kind.get(&ErrorKind::Timeout), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
        assert_eq!(engine.unresolved().await.len(), 2);
        assert_eq!(engine.by_kind(ErrorKind::Timeout).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_revokes_timers() {
        let engine = ErrorEngine::new(fixed_strategy(3));
        let record = engine.handle(&anyhow::anyhow!("network down"), ctx()).await;
        let handle = engine.schedule_retry(&record.id).await.unwrap();

        engine.clear().await;
        assert_eq!(handle.wait().await, RetryOutcome::Cancelled);
        assert!(engine.is_empty().await);
    }
}
