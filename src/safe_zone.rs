//! Id-reuse safe zone protecting local readers from mixed-state records.
//!
//! The primary keeps deleted record ids in quarantine for the safe-zone
//! duration `T` before reusing them, so transactions that start and finish
//! within `T` of each other never observe a reused id. A follower applies
//! whole batches at once, which can push its latest applied commit time
//! more than `T` past the start of a running local transaction. Such a
//! transaction may then read a record that was deleted and reused within
//! the batch, and is terminated with [`TerminationReason::Outdated`].
//!
//! Local transactions that start after the scan see the store as of the
//! batch start. When the batch itself spans more than `T`, such a
//! transaction could still straddle a reuse inside the batch, so admission
//! of new local transactions is frozen until the batch is done.

use std::time::Duration;

use tracing::{debug, info};

use crate::ports::{ActiveTransactions, TerminationReason};
use crate::transaction::BASE_TX_COMMIT_TIMESTAMP;

/// Safe-zone policy for a follower.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SafeZone {
    window_ms: u64,
}

impl SafeZone {
    /// Creates a safe zone of `window`, truncated to whole milliseconds.
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    /// Configured window.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Time between the oldest and the newest commit of a batch.
    pub fn chunk_length(oldest: u64, newest: u64) -> u64 {
        newest.saturating_sub(oldest)
    }

    /// Returns true when a batch spanning `chunk_length` must freeze admission.
    pub fn requires_freeze(&self, chunk_length: u64) -> bool {
        chunk_length > self.window_ms
    }

    /// Returns true when a transaction that started at `started_at` must be
    /// terminated once the store reaches `newest_applied`.
    pub fn is_outdated(&self, started_at: u64, newest_applied: u64) -> bool {
        if started_at == BASE_TX_COMMIT_TIMESTAMP {
            return false;
        }
        match newest_applied.checked_sub(self.window_ms) {
            Some(boundary) => started_at < boundary,
            None => false,
        }
    }

    /// Terminates every active local transaction that falls out of the zone.
    pub fn terminate_outdated(&self, registry: &dyn ActiveTransactions, newest_applied: u64) -> usize {
        let mut terminated = 0usize;
        for tx in registry.active_transactions() {
            let started_at = tx.last_tx_timestamp_when_started();
            if self.is_outdated(started_at, newest_applied) {
                tx.mark_for_termination(TerminationReason::Outdated);
                terminated += 1;
            }
        }
        terminated
    }

    /// Prepares local transactions for a batch spanning `oldest..=newest`.
    ///
    /// Freezes admission when the batch is wider than the window, then
    /// terminates outdated transactions. Admission is unfrozen when the
    /// returned guard is dropped.
    pub fn enter<'a>(
        &self,
        registry: &'a dyn ActiveTransactions,
        oldest: u64,
        newest: u64,
    ) -> SafeZoneGuard<'a> {
        let chunk_length = Self::chunk_length(oldest, newest);
        let freeze = if self.requires_freeze(chunk_length) {
            Some(AdmissionFreeze::new(registry))
        } else {
            None
        };
        let terminated = self.terminate_outdated(registry, newest);
        if terminated > 0 {
            info!(
                terminated,
                newest_applied = newest,
                window_ms = self.window_ms,
                "replica.safe_zone.terminated_outdated"
            );
        }
        debug!(
            chunk_length,
            window_ms = self.window_ms,
            frozen = freeze.is_some(),
            "replica.safe_zone.enter"
        );
        SafeZoneGuard {
            freeze,
            terminated,
            chunk_length,
        }
    }
}

/// Admission freeze held for the duration of a batch.
pub struct AdmissionFreeze<'a> {
    registry: &'a dyn ActiveTransactions,
}

impl<'a> AdmissionFreeze<'a> {
    /// Freezes admission on `registry` until the value is dropped.
    pub fn new(registry: &'a dyn ActiveTransactions) -> Self {
        registry.freeze_admission();
        debug!("replica.safe_zone.freeze");
        Self { registry }
    }
}

impl Drop for AdmissionFreeze<'_> {
    fn drop(&mut self) {
        self.registry.unfreeze_admission();
        debug!("replica.safe_zone.unfreeze");
    }
}

/// Result of entering the safe zone for one batch.
pub struct SafeZoneGuard<'a> {
    freeze: Option<AdmissionFreeze<'a>>,
    terminated: usize,
    chunk_length: u64,
}

impl SafeZoneGuard<'_> {
    /// Returns true when admission is frozen for this batch.
    pub fn frozen(&self) -> bool {
        self.freeze.is_some()
    }

    /// Number of local transactions marked outdated.
    pub fn terminated(&self) -> usize {
        self.terminated
    }

    /// Time span of the batch.
    pub fn chunk_length(&self) -> u64 {
        self.chunk_length
    }
}
