//! Invocation counters maintained by the client.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated as invocations resolve.
#[derive(Debug, Default)]
pub struct InvocationMetrics {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl InvocationMetrics {
    pub(crate) fn record_invocation(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`InvocationMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Invocations started.
    pub total: u64,
    /// Invocations that returned a success payload.
    pub succeeded: u64,
    /// Invocations that resolved to a final error.
    pub failed: u64,
    /// Retry sleeps performed across all invocations.
    pub retried: u64,
    /// Rate-limited responses observed.
    pub rate_limit_hits: u64,
}
