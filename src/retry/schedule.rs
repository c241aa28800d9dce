//! Cancellable scheduled retries.
//!
//! A retry is a tokio task that sleeps for the backoff delay and then bumps
//! the record's retry count. The caller gets a [`RetryHandle`] to await the
//! firing or revoke it; the engine keeps the task's abort handle so that
//! resolving a record revokes its pending retry.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::retry::record::ErrorId;

/// How a scheduled retry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The delay elapsed; the record now has `retry_count` retries.
    Fired { retry_count: u32 },
    /// Revoked before it fired (resolved, cleared, or cancelled).
    Cancelled,
}

/// Handle to a pending retry.
///
/// Dropping the handle does not revoke the retry; call [`RetryHandle::cancel`].
#[derive(Debug)]
pub struct RetryHandle {
    id: ErrorId,
    attempt: u32,
    delay: Duration,
    fired: oneshot::Receiver<u32>,
    abort: AbortHandle,
}

impl RetryHandle {
    pub(crate) fn new(
        id: ErrorId,
        attempt: u32,
        delay: Duration,
        fired: oneshot::Receiver<u32>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            id,
            attempt,
            delay,
            fired,
            abort,
        }
    }

    pub fn id(&self) -> ErrorId {
        self.id
    }

    /// 0-indexed attempt this retry will perform.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Revoke the retry if it has not fired yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Wait for the retry to fire or be revoked.
    pub async fn wait(self) -> RetryOutcome {
        match self.fired.await {
            Ok(retry_count) => RetryOutcome::Fired { retry_count },
            Err(_) => RetryOutcome::Cancelled,
        }
    }
}
