//! Commit, apply and close passes over a queued batch.
//!
//! The passes run strictly one after the other over the same queue and are
//! never interleaved per transaction:
//!
//! 1. commit: append every transaction to the log, then force the log once;
//! 2. apply: mark each commitment committed and apply the transaction to the
//!    store, then flush the store batch once;
//! 3. close: publish every committed transaction as applied.
//!
//! Closing is a separate pass so that threads waiting on the last closed
//! transaction id cannot proceed before the store batch has been flushed.

use std::fmt;

use tracing::debug;

use crate::error::{ReplicaError, Result};
use crate::locks::LockGroup;
use crate::ports::{ApplicationMode, BatchingStoreApplier, IndexUpdatesValidator, TransactionAppender};
use crate::queue::TransactionQueue;

/// Step of the batch pipeline, used to tag failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchStep {
    /// Appending a transaction to the log.
    Commit,
    /// Forcing the log after the commit pass.
    Force,
    /// Applying a transaction to the store.
    Apply,
    /// Flushing the store batch after the apply pass.
    CloseBatch,
}

impl fmt::Display for BatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStep::Commit => "commit",
            BatchStep::Force => "log force",
            BatchStep::Apply => "apply",
            BatchStep::CloseBatch => "store batch flush",
        };
        f.write_str(name)
    }
}

/// Counts produced by a batch run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchOutcome {
    /// Transactions appended to the log.
    pub committed: usize,
    /// Transactions applied to the store.
    pub applied: usize,
    /// Transactions published as applied.
    pub closed: usize,
}

/// Collaborators a batch run needs.
pub struct BatchContext<'a> {
    /// Log appender.
    pub appender: &'a dyn TransactionAppender,
    /// Index update validator.
    pub validator: &'a dyn IndexUpdatesValidator,
    /// Store applier.
    pub applier: &'a dyn BatchingStoreApplier,
}

/// Appends every queued transaction to the log and keeps its commitment.
pub fn commit_pass(queue: &mut TransactionQueue, appender: &dyn TransactionAppender) -> Result<usize> {
    queue.accept(|entry| {
        let tx_id = entry.transaction().tx_id();
        let commitment = appender
            .append(entry.transaction().representation(), tx_id)
            .map_err(|err| ReplicaError::batch(BatchStep::Commit, tx_id, err))?;
        entry.set_commitment(commitment);
        Ok(())
    })
}

/// Applies every queued transaction to the store, then flushes the store batch.
///
/// Validated index updates and record locks live only for the application
/// of one transaction.
pub fn apply_pass(
    queue: &mut TransactionQueue,
    validator: &dyn IndexUpdatesValidator,
    applier: &dyn BatchingStoreApplier,
) -> Result<usize> {
    let applied = queue.accept(|entry| {
        let tx_id = entry.transaction().tx_id();
        entry
            .commitment_mut()
            .ok_or_else(|| {
                ReplicaError::batch(
                    BatchStep::Apply,
                    tx_id,
                    ReplicaError::Invalid("transaction applied before it was committed"),
                )
            })?
            .publish_as_committed();
        let representation = entry.transaction().representation();
        let mut locks = LockGroup::new();
        let index_updates = validator
            .validate(representation)
            .map_err(|err| ReplicaError::batch(BatchStep::Apply, tx_id, err))?;
        applier
            .apply(
                representation,
                index_updates.as_ref(),
                &mut locks,
                tx_id,
                ApplicationMode::External,
            )
            .map_err(|err| ReplicaError::batch(BatchStep::Apply, tx_id, err))?;
        entry.handler().accept(entry.transaction());
        Ok(())
    })?;
    if let Ok(last) = queue.last() {
        let tail = last.tx_id();
        applier
            .close_batch()
            .map_err(|err| ReplicaError::batch(BatchStep::CloseBatch, tail, err))?;
    }
    Ok(applied)
}

/// Publishes every committed transaction as applied; returns how many were closed.
pub fn close_pass(queue: &mut TransactionQueue) -> usize {
    let mut closed = 0usize;
    let visited = queue.accept(|entry| {
        if let Some(commitment) = entry.commitment_mut() {
            if commitment.marked_as_committed() {
                commitment.publish_as_applied();
                closed += 1;
            }
        }
        Ok(())
    });
    debug_assert!(visited.is_ok());
    closed
}

/// Runs commit, apply and close over the queue.
///
/// The close pass runs even when the apply pass fails, so the committed
/// prefix of a failed batch is still published. Clearing the queue is left
/// to the caller.
pub fn run_batch(queue: &mut TransactionQueue, ctx: &BatchContext<'_>) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome {
        committed: commit_pass(queue, ctx.appender)?,
        ..BatchOutcome::default()
    };
    if outcome.committed == 0 {
        return Ok(outcome);
    }
    let tail = queue.last()?.tx_id();
    ctx.appender
        .force()
        .map_err(|err| ReplicaError::batch(BatchStep::Force, tail, err))?;
    debug!(
        committed = outcome.committed,
        tail_tx = tail,
        "replica.batch.committed"
    );
    let applied = apply_pass(queue, ctx.validator, ctx.applier);
    outcome.closed = close_pass(queue);
    outcome.applied = applied?;
    debug!(
        applied = outcome.applied,
        closed = outcome.closed,
        "replica.batch.closed"
    );
    Ok(outcome)
}
