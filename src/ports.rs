//! Collaborators the commit path drives but does not own.
//!
//! The transaction log, the store, index maintenance and the local
//! transaction registry live elsewhere in the engine; the unpacker only
//! relies on the contracts below.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::error::Result;
use crate::locks::LockGroup;
use crate::transaction::{TransactionRepresentation, TxId};

/// Per-transaction token returned by the log append.
///
/// A commitment first becomes *committed* (durable in the log, waiters on
/// committed ids may proceed) and later *applied* (visible as the last
/// closed transaction).
pub trait Commitment: Send {
    /// Marks the transaction as durably committed.
    fn publish_as_committed(&mut self);

    /// Returns true once [`Commitment::publish_as_committed`] was called.
    fn marked_as_committed(&self) -> bool;

    /// Marks the transaction as applied and closed.
    fn publish_as_applied(&mut self);
}

/// Appends transactions to the durable transaction log.
pub trait TransactionAppender: Send + Sync {
    /// Appends `representation` under `tx_id` without forcing it to disk.
    fn append(
        &self,
        representation: &TransactionRepresentation,
        tx_id: TxId,
    ) -> Result<Box<dyn Commitment>>;

    /// Forces every appended transaction to durable storage.
    fn force(&self) -> Result<()>;
}

/// Rotates the transaction log once it grows past its threshold.
pub trait LogRotation: Send + Sync {
    /// Rotates when needed; returns true when a rotation happened.
    fn rotate_log_if_needed(&self) -> Result<bool>;
}

/// How a transaction reaches the store.
///
/// Appliers on a follower only ever see pulled transactions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplicationMode {
    /// Transaction pulled from another instance.
    External,
}

/// Index updates validated ahead of store application.
///
/// Resources held by the validated updates are released when the value is
/// dropped.
pub trait ValidatedIndexUpdates: Send {
    /// Returns true when no index needs updating.
    fn is_empty(&self) -> bool;
}

/// Validated updates for a transaction that touches no index.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoIndexUpdates;

impl ValidatedIndexUpdates for NoIndexUpdates {
    fn is_empty(&self) -> bool {
        true
    }
}

/// Validates index-affecting updates of a transaction before it is applied.
pub trait IndexUpdatesValidator: Send + Sync {
    /// Validates the index updates `representation` implies.
    fn validate(
        &self,
        representation: &TransactionRepresentation,
    ) -> Result<Box<dyn ValidatedIndexUpdates>>;
}

/// Applies transactions to the record store, buffering writes across a batch.
pub trait BatchingStoreApplier: Send + Sync {
    /// Applies one transaction; record locks taken go into `locks`.
    fn apply(
        &self,
        representation: &TransactionRepresentation,
        index_updates: &dyn ValidatedIndexUpdates,
        locks: &mut LockGroup,
        tx_id: TxId,
        mode: ApplicationMode,
    ) -> Result<()>;

    /// Flushes writes buffered since the previous call.
    fn close_batch(&self) -> Result<()>;
}

/// Reason a local transaction was asked to terminate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TerminationReason {
    /// The transaction started before the current id-reuse safe zone.
    Outdated,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Outdated => f.write_str(
                "transaction is outdated: it started before updates that may reuse \
                 record ids it reads; restart it",
            ),
        }
    }
}

/// A local transaction tracked by the active transaction registry.
pub trait LocalTransaction: Send + Sync {
    /// Commit timestamp of the last transaction applied when this one started.
    ///
    /// [`crate::transaction::BASE_TX_COMMIT_TIMESTAMP`] when none was applied yet.
    fn last_tx_timestamp_when_started(&self) -> u64;

    /// Asks the transaction to terminate at its next check.
    fn mark_for_termination(&self, reason: TerminationReason);
}

/// Registry of running local transactions.
pub trait ActiveTransactions: Send + Sync {
    /// Snapshot of transactions active right now.
    fn active_transactions(&self) -> Vec<Arc<dyn LocalTransaction>>;

    /// Blocks new local transactions from starting.
    fn freeze_admission(&self);

    /// Lifts a previous [`ActiveTransactions::freeze_admission`].
    fn unfreeze_admission(&self);
}

/// Failure reported while waiting for an obligation.
#[derive(Debug, Error)]
pub enum FulfillError {
    /// Fulfilling the obligation conflicts with the fulfiller's state.
    #[error("illegal state: {0}")]
    StateConflict(String),
    /// Waiting was interrupted.
    #[error("interrupted while waiting for transaction obligation")]
    Interrupted,
    /// No fulfiller is available in the current role.
    #[error("obligation fulfiller unavailable")]
    Unavailable,
}

/// Ensures the store has applied transactions up to a given id.
pub trait ObligationFulfiller: Send + Sync {
    /// Blocks until `to_tx_id` has been applied locally.
    fn fulfill(&self, to_tx_id: TxId) -> std::result::Result<(), FulfillError>;
}

/// Fulfiller installed when the current role provides none.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableObligationFulfiller;

impl ObligationFulfiller for UnavailableObligationFulfiller {
    fn fulfill(&self, _to_tx_id: TxId) -> std::result::Result<(), FulfillError> {
        Err(FulfillError::Unavailable)
    }
}

/// Handle on the active transaction log file.
///
/// Appending batches and shutting the log down both hold the file monitor so
/// a concurrent shutdown cannot rotate or close the log mid-batch.
#[derive(Debug, Default)]
pub struct LogFile {
    name: String,
    monitor: Mutex<()>,
}

impl LogFile {
    /// Creates a handle for the log called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            monitor: Mutex::new(()),
        }
    }

    /// Name of the log file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the file monitor.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.monitor.lock()
    }

    /// Returns true while another thread holds the monitor.
    pub fn is_locked(&self) -> bool {
        self.monitor.is_locked()
    }
}
