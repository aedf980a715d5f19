//! Retry policy with exponential backoff for handler errors
//!
//! Errors are classified as transient or permanent. Transient errors are
//! requeued with a doubling delay until [`MAX_RETRIES`] is reached.

use std::collections::HashMap;
use std::time::Duration;

use kube::runtime::controller::Action;
use ownerwatch_core::ReconcileRequest;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Maximum number of retries before waiting for a resource change
pub const MAX_RETRIES: u32 = 10;

/// Base delay for exponential backoff (seconds)
const BASE_DELAY_SECS: u64 = 5;

/// Maximum delay between retries (1 hour)
const MAX_DELAY_SECS: u64 = 3600;

/// Tracks consecutive failed attempts per request
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<ReconcileRequest, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the attempt number
    pub fn increment(&self, request: &ReconcileRequest) -> u32 {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(request.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forget a request (call on successful reconciliation)
    pub fn reset(&self, request: &ReconcileRequest) {
        self.attempts.lock().remove(request);
    }

    pub fn get(&self, request: &ReconcileRequest) -> u32 {
        self.attempts.lock().get(request).copied().unwrap_or(0)
    }

    /// Drop entries for requests whose objects no longer exist.
    ///
    /// Returns how many entries were removed.
    pub fn cleanup(&self, exists: impl Fn(&ReconcileRequest) -> bool) -> usize {
        let mut attempts = self.attempts.lock();
        let before = attempts.len();
        attempts.retain(|request, _| exists(request));
        before - attempts.len()
    }
}

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network issues, conflicts, temporary unavailability
    Transient,
    /// Will not recover until the resource changes
    Permanent,
}

/// Delay before the next attempt, or `None` to wait for a change
pub fn backoff_delay(attempt: u32, kind: ErrorKind) -> Option<Duration> {
    match kind {
        ErrorKind::Transient if attempt < MAX_RETRIES => {
            // 5s, 10s, 20s, 40s, ... up to 1 hour
            let exponent = attempt.saturating_sub(1).min(31);
            let delay_secs = BASE_DELAY_SECS.saturating_mul(2u64.pow(exponent));
            Some(Duration::from_secs(delay_secs.min(MAX_DELAY_SECS)))
        }
        ErrorKind::Transient | ErrorKind::Permanent => None,
    }
}

/// Requeue action for a failed attempt
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Action {
    match backoff_delay(attempt, kind) {
        Some(delay) => {
            debug!(
                attempt,
                delay_secs = delay.as_secs(),
                "Scheduling retry with exponential backoff"
            );
            Action::requeue(delay)
        }
        None if kind == ErrorKind::Transient => {
            warn!(
                attempt,
                max_retries = MAX_RETRIES,
                "Max retries exceeded, waiting for resource change"
            );
            Action::await_change()
        }
        None => {
            warn!("Permanent error, waiting for resource change");
            Action::await_change()
        }
    }
}
