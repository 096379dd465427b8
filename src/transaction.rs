//! Committed transactions as pulled from the primary.

use std::fmt;

/// Identifier of a committed transaction, monotonically increasing per store.
pub type TxId = u64;

/// Transaction id of an empty store; an obligation for it is a no-op.
pub const BASE_TX_ID: TxId = 1;

/// Commit timestamp recorded for a store that has not seen any commit yet.
pub const BASE_TX_COMMIT_TIMESTAMP: u64 = 0;

/// Record family touched by a change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecordKind {
    /// Node record.
    Node,
    /// Edge record.
    Edge,
    /// Property record (including dynamic overflow chains).
    Property,
    /// Label assignment on a node.
    Label,
    /// Schema rule such as an index definition.
    Schema,
}

/// Kind of modification applied to a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChangeKind {
    /// Record came into use.
    Create,
    /// Record was modified in place.
    Update,
    /// Record was deleted; its id becomes a reuse candidate on the primary.
    Delete,
}

/// A single record change carried by a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordChange {
    /// Record family.
    pub kind: RecordKind,
    /// Record id within its family.
    pub id: u64,
    /// Modification kind.
    pub change: ChangeKind,
}

impl RecordChange {
    /// Creates a new record change.
    pub const fn new(kind: RecordKind, id: u64, change: ChangeKind) -> Self {
        Self { kind, id, change }
    }

    /// Returns true when applying the change requires index maintenance.
    pub fn affects_index(&self) -> bool {
        matches!(
            self.kind,
            RecordKind::Property | RecordKind::Label | RecordKind::Schema
        )
    }
}

/// Content of a transaction: its commit time plus the record changes it made.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransactionRepresentation {
    changes: Vec<RecordChange>,
    time_committed: u64,
}

impl TransactionRepresentation {
    /// Creates a representation holding `changes` with an empty header.
    pub fn new(changes: Vec<RecordChange>) -> Self {
        Self {
            changes,
            ..Self::default()
        }
    }

    /// Sets the commit time recorded by the primary, in milliseconds.
    pub fn with_time_committed(mut self, time_committed: u64) -> Self {
        self.time_committed = time_committed;
        self
    }

    /// Record changes in the order they were made.
    pub fn changes(&self) -> &[RecordChange] {
        &self.changes
    }

    /// Iterates over changes that require index maintenance.
    pub fn index_changes(&self) -> impl Iterator<Item = &RecordChange> {
        self.changes.iter().filter(|change| change.affects_index())
    }

    /// Returns true when the transaction changed nothing.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Time the transaction committed on the primary.
    pub fn time_committed(&self) -> u64 {
        self.time_committed
    }
}

/// A transaction committed on the primary, as received by a follower.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommittedTransaction {
    tx_id: TxId,
    time_written: u64,
    representation: TransactionRepresentation,
}

impl CommittedTransaction {
    /// Creates a committed transaction with its commit entry data.
    pub fn new(tx_id: TxId, time_written: u64, representation: TransactionRepresentation) -> Self {
        Self {
            tx_id,
            time_written,
            representation,
        }
    }

    /// Transaction id from the commit entry.
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Wall-clock commit timestamp from the commit entry, in milliseconds.
    pub fn time_written(&self) -> u64 {
        self.time_written
    }

    /// Transaction content.
    pub fn representation(&self) -> &TransactionRepresentation {
        &self.representation
    }
}

impl fmt::Display for CommittedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx {} @ {} ({} changes)",
            self.tx_id,
            self.time_written,
            self.representation.changes.len()
        )
    }
}

/// Callback invoked once a pulled transaction has been applied to the store.
pub trait TxHandler: Send + Sync {
    /// Called after `transaction` was applied, before its locks are released.
    fn accept(&self, transaction: &CommittedTransaction);
}

impl<F> TxHandler for F
where
    F: Fn(&CommittedTransaction) + Send + Sync,
{
    fn accept(&self, transaction: &CommittedTransaction) {
        self(transaction)
    }
}

/// Handler that ignores applied transactions.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTxHandler;

impl TxHandler for NoopTxHandler {
    fn accept(&self, _transaction: &CommittedTransaction) {}
}
