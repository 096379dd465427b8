//! In-memory tracking of committed and closed transaction ids.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::ports::{Commitment, FulfillError, ObligationFulfiller};
use crate::transaction::{TxId, BASE_TX_COMMIT_TIMESTAMP};

#[derive(Debug)]
struct IdState {
    last_committed: TxId,
    last_committed_timestamp: u64,
    last_closed: TxId,
    shutdown: bool,
}

/// Last committed and last closed transaction ids of the local store.
///
/// Ids only move forward. Threads waiting on a closed id are woken when the
/// id is closed or when the store shuts down.
#[derive(Debug)]
pub struct TransactionIdStore {
    state: Mutex<IdState>,
    closed: Condvar,
}

impl TransactionIdStore {
    /// Creates a store where `base` is both committed and closed.
    pub fn new(base: TxId) -> Self {
        Self {
            state: Mutex::new(IdState {
                last_committed: base,
                last_committed_timestamp: BASE_TX_COMMIT_TIMESTAMP,
                last_closed: base,
                shutdown: false,
            }),
            closed: Condvar::new(),
        }
    }

    /// Records `tx_id` as committed at `time_committed`.
    pub fn transaction_committed(&self, tx_id: TxId, time_committed: u64) {
        let mut state = self.state.lock();
        if tx_id > state.last_committed {
            state.last_committed = tx_id;
            state.last_committed_timestamp = time_committed;
        }
    }

    /// Records `tx_id` as closed and wakes waiters.
    pub fn transaction_closed(&self, tx_id: TxId) {
        let mut state = self.state.lock();
        if tx_id > state.last_closed {
            state.last_closed = tx_id;
        }
        drop(state);
        self.closed.notify_all();
    }

    /// Last committed transaction id.
    pub fn last_committed(&self) -> TxId {
        self.state.lock().last_committed
    }

    /// Commit timestamp of the last committed transaction.
    pub fn last_committed_timestamp(&self) -> u64 {
        self.state.lock().last_committed_timestamp
    }

    /// Last closed transaction id.
    pub fn last_closed(&self) -> TxId {
        self.state.lock().last_closed
    }

    /// Blocks until `tx_id` is closed.
    ///
    /// Returns [`FulfillError::Interrupted`] when the store shuts down first.
    pub fn await_closed(&self, tx_id: TxId) -> Result<(), FulfillError> {
        let mut state = self.state.lock();
        loop {
            if state.last_closed >= tx_id {
                return Ok(());
            }
            if state.shutdown {
                return Err(FulfillError::Interrupted);
            }
            self.closed.wait(&mut state);
        }
    }

    /// Interrupts every current and future waiter.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.closed.notify_all();
    }

    /// Creates a commitment for `tx_id` reporting to this store.
    pub fn commitment(self: &Arc<Self>, tx_id: TxId, time_committed: u64) -> TrackedCommitment {
        TrackedCommitment::new(Arc::clone(self), tx_id, time_committed)
    }
}

/// Commitment publishing its progress to a [`TransactionIdStore`].
#[derive(Debug)]
pub struct TrackedCommitment {
    store: Arc<TransactionIdStore>,
    tx_id: TxId,
    time_committed: u64,
    committed: bool,
    applied: bool,
}

impl TrackedCommitment {
    /// Creates a pending commitment.
    pub fn new(store: Arc<TransactionIdStore>, tx_id: TxId, time_committed: u64) -> Self {
        Self {
            store,
            tx_id,
            time_committed,
            committed: false,
            applied: false,
        }
    }

    /// Transaction id of the commitment.
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Returns true once the commitment was published as applied.
    pub fn published_as_applied(&self) -> bool {
        self.applied
    }
}

impl Commitment for TrackedCommitment {
    fn publish_as_committed(&mut self) {
        self.store
            .transaction_committed(self.tx_id, self.time_committed);
        self.committed = true;
    }

    fn marked_as_committed(&self) -> bool {
        self.committed
    }

    fn publish_as_applied(&mut self) {
        debug_assert!(self.committed, "applied before committed");
        self.store.transaction_closed(self.tx_id);
        self.applied = true;
    }
}

/// Fulfills obligations by waiting for the id store to close the target.
#[derive(Debug)]
pub struct IdStoreObligationFulfiller {
    store: Arc<TransactionIdStore>,
    stopped: AtomicBool,
}

impl IdStoreObligationFulfiller {
    /// Creates a fulfiller waiting on `store`.
    pub fn new(store: Arc<TransactionIdStore>) -> Self {
        Self {
            store,
            stopped: AtomicBool::new(false),
        }
    }

    /// Rejects every later call.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl ObligationFulfiller for IdStoreObligationFulfiller {
    fn fulfill(&self, to_tx_id: TxId) -> Result<(), FulfillError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(FulfillError::StateConflict(
                "obligation fulfiller is stopped".into(),
            ));
        }
        debug!(to_tx_id, last_closed = self.store.last_closed(), "replica.obligation.await");
        self.store.await_closed(to_tx_id)
    }
}
