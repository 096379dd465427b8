//! Follower-side commit path for the Sombra graph store.
//!
//! Transactions pulled from the primary are queued, then committed to the
//! transaction log, applied to the store and finally published as closed,
//! one batch at a time. Local readers that could observe reused record ids
//! while a batch is applied are terminated through the safe-zone protocol.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod health;
pub mod id_store;
pub mod kernel_transactions;
pub mod lifecycle;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod queue;
pub mod response;
pub mod safe_zone;
pub mod transaction;
pub mod unpacker;

pub use config::{ConfigError, UnpackerConfig};
pub use error::{ReplicaError, Result};
pub use health::{KernelHealth, PanicCause, KERNEL_PANIC_MESSAGE};
pub use id_store::{IdStoreObligationFulfiller, TrackedCommitment, TransactionIdStore};
pub use kernel_transactions::{KernelTransaction, KernelTransactions, LocalTransactionHandle};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use locks::{LockGroup, RecordLocks};
pub use metrics::{CounterMetrics, NoopMetrics, UnpackerMetrics};
pub use pipeline::{BatchOutcome, BatchStep};
pub use ports::{
    ActiveTransactions, ApplicationMode, BatchingStoreApplier, Commitment, FulfillError,
    IndexUpdatesValidator, LocalTransaction, LogFile, LogRotation, NoIndexUpdates,
    ObligationFulfiller, TerminationReason, TransactionAppender, ValidatedIndexUpdates,
};
pub use queue::TransactionQueue;
pub use response::{Response, TransactionStream};
pub use safe_zone::SafeZone;
pub use transaction::{
    ChangeKind, CommittedTransaction, NoopTxHandler, RecordChange, RecordKind,
    TransactionRepresentation, TxHandler, TxId, BASE_TX_COMMIT_TIMESTAMP, BASE_TX_ID,
};
pub use unpacker::{CommittingResponseUnpacker, Dependencies, ResponseUnpacker};
