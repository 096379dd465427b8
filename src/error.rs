//! Error types for the follower commit path.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::health::{PanicCause, KERNEL_PANIC_MESSAGE};
use crate::pipeline::BatchStep;
use crate::ports::{FulfillError, TerminationReason};
use crate::transaction::TxId;

/// Result alias used throughout the replica crate.
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Errors surfaced by the follower commit path and its collaborators.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// I/O failure, including interruption while waiting on an obligation.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// Pulling updates from the primary failed; carries the trace context.
    #[error("{message} [{trace}]")]
    Communication {
        /// Operator-facing summary.
        message: &'static str,
        /// Call site that observed the failure.
        trace: &'static str,
        /// Underlying fulfillment failure.
        #[source]
        source: FulfillError,
    },
    /// The unpacker has not been started yet.
    #[error("component has not been started")]
    NotStarted,
    /// The unpacker was stopped and refuses further responses.
    #[error("component is currently stopped")]
    Stopped,
    /// The kernel was panicked earlier; pulled transactions cannot be applied.
    #[error("{}", KERNEL_PANIC_MESSAGE)]
    KernelPanic {
        /// Cause recorded when the kernel panicked.
        #[source]
        cause: PanicCause,
    },
    /// A batch pass failed; the kernel has been panicked.
    #[error("{step} failed at transaction {tx_id}")]
    Batch {
        /// Pass that failed.
        step: BatchStep,
        /// Transaction being processed, or the batch tail for batch-wide steps.
        tx_id: TxId,
        /// Collaborator error.
        #[source]
        source: Box<ReplicaError>,
    },
    /// Transaction log failure reported by an appender or rotation.
    #[error("transaction log: {0}")]
    Log(String),
    /// Store application failure.
    #[error("store apply: {0}")]
    Store(String),
    /// Index update validation failure.
    #[error("index update: {0}")]
    Index(String),
    /// Record lock acquisition failure.
    #[error("lock: {0}")]
    Lock(String),
    /// A local transaction was marked for termination.
    #[error("transaction terminated: {0}")]
    Terminated(TerminationReason),
    /// Operation not supported in the current role.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// Invalid argument or state.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ReplicaError {
    pub(crate) fn batch(step: BatchStep, tx_id: TxId, source: ReplicaError) -> Self {
        ReplicaError::Batch {
            step,
            tx_id,
            source: Box::new(source),
        }
    }

    /// Returns true when the error leaves the kernel panicked.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplicaError::Batch { .. } | ReplicaError::KernelPanic { .. }
        )
    }
}
