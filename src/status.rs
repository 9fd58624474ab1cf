//! Dispatch status counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub started: u64,
    pub in_progress: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Attempts the provider rejected with a rate-limit signal.
    pub rate_limited: u64,
    /// Attempts the provider rejected for any other reason.
    pub api_errors: u64,
    /// Attempts that failed before a provider response was decoded.
    pub other_errors: u64,
    /// Unix milliseconds of the last rate-limit signal, if any.
    pub last_rate_limit_at_ms: Option<u64>,
}

/// Process-wide dispatch counters. Written by the dispatcher workers only.
///
/// Counters are independent atomics; a snapshot is not a consistent cut
/// across fields.
#[derive(Debug, Default)]
pub struct StatusTracker {
    started: AtomicU64,
    in_progress: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rate_limited: AtomicU64,
    api_errors: AtomicU64,
    other_errors: AtomicU64,
    last_rate_limit_at_ms: AtomicU64,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// An item was dequeued.
    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.in_progress.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.finish();
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.finish();
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        self.finish();
    }

    /// The item was cancelled while still queued and never started.
    pub fn record_withdrawn(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// The item ended because the dispatcher shut down.
    pub fn record_interrupted(&self) {
        self.finish();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        self.last_rate_limit_at_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_api_error(&self) {
        self.api_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_other_error(&self) {
        self.other_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        let _ = self
            .in_progress
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let last = self.last_rate_limit_at_ms.load(Ordering::Relaxed);
        StatusSnapshot {
            started: self.started.load(Ordering::Relaxed),
            in_progress: self.in_progress.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
            last_rate_limit_at_ms: (last != 0).then_some(last),
        }
    }
}
