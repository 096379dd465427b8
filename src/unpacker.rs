//! Turns responses from the primary into locally committed transactions.

use std::io;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::UnpackerConfig;
use crate::error::{ReplicaError, Result};
use crate::health::KernelHealth;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::metrics::{NoopMetrics, UnpackerMetrics};
use crate::pipeline::{run_batch, BatchContext};
use crate::ports::{
    ActiveTransactions, BatchingStoreApplier, FulfillError, IndexUpdatesValidator, LogFile,
    LogRotation, ObligationFulfiller, TransactionAppender, UnavailableObligationFulfiller,
};
use crate::queue::TransactionQueue;
use crate::response::{Response, TransactionStream};
use crate::safe_zone::SafeZone;
use crate::transaction::{TxHandler, TxId, BASE_TX_ID};

const OBLIGATION_TRACE: &str = "BatchingResponseHandler.obligation";

/// Consumes responses pulled from the primary.
pub trait ResponseUnpacker {
    /// Fulfills the obligation or commits and applies the transactions
    /// carried by `response`, notifying `handler` for each applied one.
    fn unpack_response(&mut self, response: Response, handler: Arc<dyn TxHandler>) -> Result<()>;
}

/// Resolves the live collaborators of the commit path.
///
/// Called on every [`CommittingResponseUnpacker::start`]; role switches may
/// hand out different instances between starts.
pub trait Dependencies: Send + Sync {
    /// Store applier.
    fn store_applier(&self) -> Arc<dyn BatchingStoreApplier>;
    /// Index update validator.
    fn index_updates_validator(&self) -> Arc<dyn IndexUpdatesValidator>;
    /// Active log file, locked while a batch is applied.
    fn log_file(&self) -> Arc<LogFile>;
    /// Log rotation.
    fn log_rotation(&self) -> Arc<dyn LogRotation>;
    /// Shared kernel health.
    fn kernel_health(&self) -> KernelHealth;
    /// Obligation fulfiller, when the current role provides one.
    fn obligation_fulfiller(&self) -> Option<Arc<dyn ObligationFulfiller>>;
    /// Transaction log appender.
    fn transaction_appender(&self) -> Arc<dyn TransactionAppender>;
    /// Registry of local transactions.
    fn active_transactions(&self) -> Arc<dyn ActiveTransactions>;
}

struct BoundDependencies {
    appender: Arc<dyn TransactionAppender>,
    fulfiller: Arc<dyn ObligationFulfiller>,
    applier: Arc<dyn BatchingStoreApplier>,
    validator: Arc<dyn IndexUpdatesValidator>,
    log_file: Arc<LogFile>,
    log_rotation: Arc<dyn LogRotation>,
    health: KernelHealth,
    active: Arc<dyn ActiveTransactions>,
}

impl BoundDependencies {
    fn resolve(deps: &dyn Dependencies) -> Self {
        let fulfiller = deps.obligation_fulfiller().unwrap_or_else(|| {
            debug!("replica.unpacker.fulfiller_unavailable");
            Arc::new(UnavailableObligationFulfiller)
        });
        Self {
            appender: deps.transaction_appender(),
            fulfiller,
            applier: deps.store_applier(),
            validator: deps.index_updates_validator(),
            log_file: deps.log_file(),
            log_rotation: deps.log_rotation(),
            health: deps.kernel_health(),
            active: deps.active_transactions(),
        }
    }
}

/// Response unpacker that commits pulled transactions in batches.
///
/// Transactions are queued as they are read from the response and the
/// queue is run through commit, apply and close whenever it fills up and
/// once more when the response ends.
pub struct CommittingResponseUnpacker {
    deps: Arc<dyn Dependencies>,
    queue: TransactionQueue,
    safe_zone: SafeZone,
    lifecycle: Arc<Lifecycle>,
    metrics: Arc<dyn UnpackerMetrics>,
    bound: Option<Arc<BoundDependencies>>,
}

impl CommittingResponseUnpacker {
    /// Creates an unpacker; call [`CommittingResponseUnpacker::start`] before use.
    pub fn new(deps: Arc<dyn Dependencies>, config: UnpackerConfig) -> Self {
        let config = config.normalize();
        Self {
            deps,
            queue: TransactionQueue::new(config.max_batch_size),
            safe_zone: SafeZone::new(config.id_reuse_safe_zone),
            lifecycle: Arc::new(Lifecycle::new()),
            metrics: Arc::new(NoopMetrics),
            bound: None,
        }
    }

    /// Reports activity to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn UnpackerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Resolves collaborators and starts accepting responses.
    pub fn start(&mut self) -> Result<()> {
        self.lifecycle.start()?;
        self.bound = Some(Arc::new(BoundDependencies::resolve(self.deps.as_ref())));
        info!(
            max_batch_size = self.queue.max_batch_size(),
            safe_zone_ms = self.safe_zone.window().as_millis() as u64,
            "replica.unpacker.started"
        );
        Ok(())
    }

    /// Stops accepting responses. A stopped unpacker cannot be restarted.
    pub fn stop(&self) {
        self.lifecycle.stop();
        info!("replica.unpacker.stopped");
    }

    /// Stops the unpacker and releases the resolved collaborators.
    pub fn shutdown(&mut self) {
        self.stop();
        self.bound = None;
    }

    /// Lifecycle shared with threads that may stop the unpacker.
    pub fn lifecycle_handle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn fulfill_obligation(&self, bound: &BoundDependencies, tx_id: TxId) -> Result<()> {
        if tx_id == BASE_TX_ID {
            return Ok(());
        }
        match bound.fulfiller.fulfill(tx_id) {
            Ok(()) => {
                self.metrics.obligation_fulfilled();
                debug!(tx_id, "replica.obligation.fulfilled");
                Ok(())
            }
            Err(source @ FulfillError::StateConflict(_)) => {
                warn!(tx_id, error = %source, trace = OBLIGATION_TRACE, "replica.obligation.failed");
                Err(ReplicaError::Communication {
                    message: "failed to pull updates",
                    trace: OBLIGATION_TRACE,
                    source,
                })
            }
            Err(FulfillError::Interrupted) => Err(ReplicaError::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                FulfillError::Interrupted,
            ))),
            Err(FulfillError::Unavailable) => Err(ReplicaError::Unsupported(
                "obligations cannot be fulfilled in the current role",
            )),
        }
    }

    fn unpack_transactions(
        &mut self,
        bound: &BoundDependencies,
        stream: TransactionStream,
        handler: Arc<dyn TxHandler>,
    ) -> Result<()> {
        let consumed = self.queue_stream(bound, stream, &handler);
        // A failed flush has panicked the kernel and outranks a stream failure.
        self.apply_queued_transactions(bound)?;
        consumed
    }

    fn queue_stream(
        &mut self,
        bound: &BoundDependencies,
        stream: TransactionStream,
        handler: &Arc<dyn TxHandler>,
    ) -> Result<()> {
        for transaction in stream {
            if self.queue.queue(transaction?, Arc::clone(handler)) {
                self.apply_queued_transactions(bound)?;
            }
        }
        Ok(())
    }

    fn apply_queued_transactions(&mut self, bound: &BoundDependencies) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let oldest = self.queue.first()?.time_written();
        let newest = self.queue.last()?.time_written();
        let zone = self.safe_zone.enter(bound.active.as_ref(), oldest, newest);
        if zone.frozen() {
            self.metrics.admission_frozen();
        }
        if zone.terminated() > 0 {
            self.metrics.transactions_terminated(zone.terminated());
        }

        let _log = bound.log_file.lock();
        let mut batch = self.queue.batch_scope();
        bound.log_rotation.rotate_log_if_needed()?;
        if let Err(err) = bound.health.assert_healthy() {
            error!(error = %err, log = bound.log_file.name(), "replica.batch.refused_unhealthy");
            return Err(err);
        }

        let first_tx = batch.first()?.tx_id();
        let last_tx = batch.last()?.tx_id();
        debug!(
            first_tx,
            last_tx,
            len = batch.len(),
            frozen = zone.frozen(),
            chunk_length = zone.chunk_length(),
            "replica.batch.start"
        );
        let ctx = BatchContext {
            appender: bound.appender.as_ref(),
            validator: bound.validator.as_ref(),
            applier: bound.applier.as_ref(),
        };
        match run_batch(&mut batch, &ctx) {
            Ok(outcome) => {
                self.metrics.batch_applied(outcome.applied);
                debug!(
                    first_tx,
                    last_tx,
                    applied = outcome.applied,
                    "replica.batch.done"
                );
                Ok(())
            }
            Err(err) => {
                bound.health.panic(&err);
                self.metrics.kernel_panicked();
                Err(err)
            }
        }
    }
}

impl ResponseUnpacker for CommittingResponseUnpacker {
    fn unpack_response(&mut self, response: Response, handler: Arc<dyn TxHandler>) -> Result<()> {
        self.lifecycle.ensure_started()?;
        let bound = self.bound.clone().ok_or(ReplicaError::NotStarted)?;
        match response {
            Response::Obligation { tx_id } => self.fulfill_obligation(&bound, tx_id),
            Response::Transactions(stream) => self.unpack_transactions(&bound, stream, handler),
        }
    }
}
