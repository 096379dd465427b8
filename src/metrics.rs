//! Activity counters of the follower commit path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for tracking activity of the follower commit path.
///
/// Implementations receive one callback per event; they must be cheap since
/// they run on the replication thread.
pub trait UnpackerMetrics: Send + Sync {
    /// Records a batch that went through commit, apply and close.
    fn batch_applied(&self, transactions: usize);

    /// Records a batch that froze local transaction admission.
    fn admission_frozen(&self);

    /// Records local transactions terminated as outdated.
    fn transactions_terminated(&self, count: usize);

    /// Records a batch failure that panicked the kernel.
    fn kernel_panicked(&self);

    /// Records a fulfilled obligation.
    fn obligation_fulfilled(&self);
}

/// A no-op implementation of [`UnpackerMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl UnpackerMetrics for NoopMetrics {
    fn batch_applied(&self, _transactions: usize) {}
    fn admission_frozen(&self) {}
    fn transactions_terminated(&self, _count: usize) {}
    fn kernel_panicked(&self) {}
    fn obligation_fulfilled(&self) {}
}

/// A thread-safe counter-based implementation of [`UnpackerMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of batches applied.
    pub batches: AtomicU64,

    /// Number of transactions applied across all batches.
    pub transactions: AtomicU64,

    /// Number of batches that froze admission.
    pub freezes: AtomicU64,

    /// Number of local transactions terminated as outdated.
    pub terminated: AtomicU64,

    /// Number of kernel panics triggered by failed batches.
    pub panics: AtomicU64,

    /// Number of obligations fulfilled.
    pub obligations: AtomicU64,
}

impl UnpackerMetrics for CounterMetrics {
    fn batch_applied(&self, transactions: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.transactions
            .fetch_add(transactions as u64, Ordering::Relaxed);
    }

    fn admission_frozen(&self) {
        self.freezes.fetch_add(1, Ordering::Relaxed);
    }

    fn transactions_terminated(&self, count: usize) {
        self.terminated.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn kernel_panicked(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    fn obligation_fulfilled(&self) {
        self.obligations.fetch_add(1, Ordering::Relaxed);
    }
}

impl CounterMetrics {
    /// Returns a plain snapshot of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            freezes: self.freezes.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            obligations: self.obligations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MetricsSnapshot {
    /// Batches applied.
    pub batches: u64,
    /// Transactions applied.
    pub transactions: u64,
    /// Batches that froze admission.
    pub freezes: u64,
    /// Local transactions terminated.
    pub terminated: u64,
    /// Kernel panics.
    pub panics: u64,
    /// Obligations fulfilled.
    pub obligations: u64,
}
