//! Registry of local transactions running on a follower.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{ReplicaError, Result};
use crate::ports::{ActiveTransactions, LocalTransaction, TerminationReason};

/// A local transaction as seen by the registry.
#[derive(Debug)]
pub struct KernelTransaction {
    id: u64,
    started_at: u64,
    termination: Mutex<Option<TerminationReason>>,
}

impl KernelTransaction {
    /// Registry-assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Commit timestamp of the last applied transaction when this one began.
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Reason the transaction was marked for termination, if any.
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        *self.termination.lock()
    }

    /// Fails with [`ReplicaError::Terminated`] once marked for termination.
    pub fn assert_open(&self) -> Result<()> {
        match self.termination_reason() {
            Some(reason) => Err(ReplicaError::Terminated(reason)),
            None => Ok(()),
        }
    }
}

impl LocalTransaction for KernelTransaction {
    fn last_tx_timestamp_when_started(&self) -> u64 {
        self.started_at
    }

    fn mark_for_termination(&self, reason: TerminationReason) {
        let mut slot = self.termination.lock();
        if slot.is_none() {
            *slot = Some(reason);
            debug!(tx = self.id, %reason, "kernel.transaction.marked_for_termination");
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    frozen: usize,
    next_id: u64,
    active: HashMap<u64, Arc<KernelTransaction>>,
}

/// Tracks running local transactions and gates admission of new ones.
///
/// Freezes nest: admission resumes once every freeze has been lifted.
#[derive(Debug, Default)]
pub struct KernelTransactions {
    registry: Mutex<Registry>,
    admission: Condvar,
}

impl KernelTransactions {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts a transaction, blocking while admission is frozen.
    pub fn begin(self: &Arc<Self>, last_committed_timestamp: u64) -> LocalTransactionHandle {
        let mut registry = self.registry.lock();
        while registry.frozen > 0 {
            self.admission.wait(&mut registry);
        }
        self.register(&mut registry, last_committed_timestamp)
    }

    /// Starts a transaction unless admission is frozen.
    pub fn try_begin(self: &Arc<Self>, last_committed_timestamp: u64) -> Option<LocalTransactionHandle> {
        let mut registry = self.registry.lock();
        if registry.frozen > 0 {
            return None;
        }
        Some(self.register(&mut registry, last_committed_timestamp))
    }

    /// Returns true while admission is frozen.
    pub fn is_frozen(&self) -> bool {
        self.registry.lock().frozen > 0
    }

    /// Number of running transactions.
    pub fn active_count(&self) -> usize {
        self.registry.lock().active.len()
    }

    fn register(self: &Arc<Self>, registry: &mut Registry, started_at: u64) -> LocalTransactionHandle {
        registry.next_id += 1;
        let tx = Arc::new(KernelTransaction {
            id: registry.next_id,
            started_at,
            termination: Mutex::new(None),
        });
        registry.active.insert(tx.id, Arc::clone(&tx));
        LocalTransactionHandle {
            tx,
            registry: Arc::clone(self),
        }
    }

    fn release(&self, id: u64) {
        self.registry.lock().active.remove(&id);
    }
}

impl ActiveTransactions for KernelTransactions {
    fn active_transactions(&self) -> Vec<Arc<dyn LocalTransaction>> {
        self.registry
            .lock()
            .active
            .values()
            .map(|tx| Arc::clone(tx) as Arc<dyn LocalTransaction>)
            .collect()
    }

    fn freeze_admission(&self) {
        self.registry.lock().frozen += 1;
    }

    fn unfreeze_admission(&self) {
        let mut registry = self.registry.lock();
        registry.frozen = registry.frozen.saturating_sub(1);
        if registry.frozen == 0 {
            drop(registry);
            self.admission.notify_all();
        }
    }
}

/// Running local transaction; deregisters itself when dropped.
#[derive(Debug)]
pub struct LocalTransactionHandle {
    tx: Arc<KernelTransaction>,
    registry: Arc<KernelTransactions>,
}

impl LocalTransactionHandle {
    /// Shared reference to the registered transaction.
    pub fn transaction(&self) -> &Arc<KernelTransaction> {
        &self.tx
    }
}

impl Deref for LocalTransactionHandle {
    type Target = KernelTransaction;

    fn deref(&self) -> &KernelTransaction {
        &self.tx
    }
}

impl Drop for LocalTransactionHandle {
    fn drop(&mut self) {
        self.registry.release(self.tx.id);
    }
}
