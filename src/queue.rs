//! Bounded queue of pulled transactions awaiting the batch pipeline.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::warn;

use crate::error::{ReplicaError, Result};
use crate::ports::Commitment;
use crate::transaction::{CommittedTransaction, TxHandler};

/// A queued transaction, its completion handler and its commitment slot.
pub struct QueuedTransaction {
    transaction: CommittedTransaction,
    handler: Arc<dyn TxHandler>,
    commitment: Option<Box<dyn Commitment>>,
}

impl QueuedTransaction {
    /// The pulled transaction.
    pub fn transaction(&self) -> &CommittedTransaction {
        &self.transaction
    }

    /// Handler to notify once the transaction is applied.
    pub fn handler(&self) -> &dyn TxHandler {
        self.handler.as_ref()
    }

    /// Mutable access to the commitment slot.
    pub fn commitment_mut(&mut self) -> Option<&mut (dyn Commitment + 'static)> {
        self.commitment.as_deref_mut()
    }

    /// Stores the commitment returned by the log append.
    pub fn set_commitment(&mut self, commitment: Box<dyn Commitment>) {
        self.commitment = Some(commitment);
    }
}

/// Ordered, bounded buffer of pulled transactions.
///
/// Insertion order is commit order; the upstream transport delivers
/// transactions with increasing ids and the queue never reorders them.
pub struct TransactionQueue {
    entries: Vec<QueuedTransaction>,
    max_batch_size: usize,
}

impl TransactionQueue {
    /// Creates a queue that reports itself full at `max_batch_size` entries.
    pub fn new(max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            entries: Vec::with_capacity(max_batch_size),
            max_batch_size,
        }
    }

    /// Appends a transaction; returns true once the batch is full.
    pub fn queue(&mut self, transaction: CommittedTransaction, handler: Arc<dyn TxHandler>) -> bool {
        if let Some(last) = self.entries.last() {
            let last_tx = last.transaction.tx_id();
            if transaction.tx_id() <= last_tx {
                warn!(
                    tx_id = transaction.tx_id(),
                    last_tx,
                    "replica.queue.out_of_order"
                );
            }
        }
        self.entries.push(QueuedTransaction {
            transaction,
            handler,
            commitment: None,
        });
        self.entries.len() >= self.max_batch_size
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Configured batch size.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Earliest queued transaction.
    pub fn first(&self) -> Result<&CommittedTransaction> {
        self.entries
            .first()
            .map(|entry| &entry.transaction)
            .ok_or(ReplicaError::Invalid("transaction queue is empty"))
    }

    /// Latest queued transaction.
    pub fn last(&self) -> Result<&CommittedTransaction> {
        self.entries
            .last()
            .map(|entry| &entry.transaction)
            .ok_or(ReplicaError::Invalid("transaction queue is empty"))
    }

    /// Visits every entry in insertion order and returns how many were visited.
    ///
    /// Stops at the first error, which is returned as-is.
    pub fn accept<F>(&mut self, mut visitor: F) -> Result<usize>
    where
        F: FnMut(&mut QueuedTransaction) -> Result<()>,
    {
        for entry in self.entries.iter_mut() {
            visitor(entry)?;
        }
        Ok(self.entries.len())
    }

    /// Discards every entry together with its commitment.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Borrows the queue for one batch; the queue is cleared when the scope ends.
    pub fn batch_scope(&mut self) -> BatchScope<'_> {
        BatchScope { queue: self }
    }
}

/// Exclusive borrow of a queue that clears it on drop, whatever the outcome.
pub struct BatchScope<'a> {
    queue: &'a mut TransactionQueue,
}

impl Deref for BatchScope<'_> {
    type Target = TransactionQueue;

    fn deref(&self) -> &TransactionQueue {
        self.queue
    }
}

impl DerefMut for BatchScope<'_> {
    fn deref_mut(&mut self) -> &mut TransactionQueue {
        self.queue
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.queue.clear();
    }
}
