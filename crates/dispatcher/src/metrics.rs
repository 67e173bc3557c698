//! Dispatch counters for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Live counters of one publish run
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Workers currently rendering an item
    active_workers: AtomicUsize,
    /// Items handed out
    issued_count: AtomicU64,
    /// Items skipped because they could not be resolved
    skipped_count: AtomicU64,
    /// Prefetch batches requested
    prefetch_batches: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn inc_active_workers(&self) -> usize {
        let now = self.active_workers.fetch_add(1, Ordering::Relaxed) + 1;
        observability::record_active_workers(now);
        now
    }

    /// Never drops below zero
    pub fn dec_active_workers(&self) -> usize {
        let previous = self
            .active_workers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        let now = previous.saturating_sub(1);
        observability::record_active_workers(now);
        now
    }

    pub fn issued_count(&self) -> u64 {
        self.issued_count.load(Ordering::Relaxed)
    }

    /// Returns the post-increment count
    pub fn inc_issued_count(&self) -> u64 {
        self.issued_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_count.load(Ordering::Relaxed)
    }

    pub fn inc_skipped_count(&self) {
        self.skipped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prefetch_batches(&self) -> u64 {
        self.prefetch_batches.load(Ordering::Relaxed)
    }

    pub fn inc_prefetch_batches(&self) {
        self.prefetch_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_workers: self.active_workers(),
            issued_count: self.issued_count(),
            skipped_count: self.skipped_count(),
            prefetch_batches: self.prefetch_batches(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_workers: usize,
    pub issued_count: u64,
    pub skipped_count: u64,
    pub prefetch_batches: u64,
}
