#![allow(missing_docs)]

mod support;

use std::error::Error as _;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sombra_replica::{
    FulfillError, IdStoreObligationFulfiller, LifecycleState, ObligationFulfiller, ReplicaError,
    Response, ResponseUnpacker, TxId, UnpackerConfig, BASE_TX_ID,
};
use support::{txs, Follower, RecordingHandler};

#[derive(Default)]
struct ScriptedFulfiller {
    calls: AtomicUsize,
    conflict: bool,
}

impl ObligationFulfiller for ScriptedFulfiller {
    fn fulfill(&self, _to_tx_id: TxId) -> Result<(), FulfillError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.conflict {
            return Err(FulfillError::StateConflict("store is switching role".into()));
        }
        Ok(())
    }
}

fn handler() -> Arc<RecordingHandler> {
    Arc::new(RecordingHandler::default())
}

#[test]
fn base_obligation_is_a_no_op() {
    let follower = Follower::new();
    let scripted = Arc::new(ScriptedFulfiller::default());
    *follower.fulfiller.lock() = Some(scripted.clone() as Arc<dyn ObligationFulfiller>);
    let mut unpacker = follower.unpacker(UnpackerConfig::default());

    unpacker.unpack_response(Response::empty(), handler()).unwrap();
    unpacker
        .unpack_response(Response::obligation(BASE_TX_ID), handler())
        .unwrap();

    assert_eq!(scripted.calls.load(Ordering::SeqCst), 0);
    assert!(follower.journal.events().is_empty());
}

#[test]
fn obligation_waits_for_the_target_to_close() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    unpacker
        .unpack_response(Response::transactions(txs(2, 3, 100)), handler())
        .unwrap();
    unpacker
        .unpack_response(Response::obligation(4), handler())
        .unwrap();

    let ids = Arc::clone(&follower.ids);
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        ids.transaction_closed(5);
    });
    unpacker
        .unpack_response(Response::obligation(5), handler())
        .unwrap();
    closer.join().unwrap();

    assert_eq!(follower.metrics.snapshot().obligations, 2);
}

#[test]
fn state_conflict_becomes_communication_failure() {
    let follower = Follower::new();
    let conflicting: Arc<dyn ObligationFulfiller> = Arc::new(ScriptedFulfiller {
        calls: AtomicUsize::new(0),
        conflict: true,
    });
    *follower.fulfiller.lock() = Some(conflicting);
    let mut unpacker = follower.unpacker(UnpackerConfig::default());

    let err = unpacker
        .unpack_response(Response::obligation(9), handler())
        .unwrap_err();

    match &err {
        ReplicaError::Communication { trace, source, .. } => {
            assert_eq!(*trace, "BatchingResponseHandler.obligation");
            assert!(matches!(source, FulfillError::StateConflict(_)));
        }
        other => panic!("expected communication failure, got {other:?}"),
    }
    assert!(err.to_string().contains("BatchingResponseHandler.obligation"));
    assert!(err.source().is_some());
    assert!(follower.health.is_healthy());
}

#[test]
fn stopped_fulfiller_reports_state_conflict() {
    let follower = Follower::new();
    let fulfiller = Arc::new(IdStoreObligationFulfiller::new(Arc::clone(&follower.ids)));
    fulfiller.stop();
    *follower.fulfiller.lock() = Some(fulfiller as Arc<dyn ObligationFulfiller>);
    let mut unpacker = follower.unpacker(UnpackerConfig::default());

    let err = unpacker
        .unpack_response(Response::obligation(2), handler())
        .unwrap_err();
    assert!(matches!(err, ReplicaError::Communication { .. }));
}

#[test]
fn interrupted_wait_becomes_io_error() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    follower.ids.shutdown();

    let err = unpacker
        .unpack_response(Response::obligation(10), handler())
        .unwrap_err();

    match err {
        ReplicaError::Io(source) => assert_eq!(source.kind(), io::ErrorKind::Interrupted),
        other => panic!("expected io failure, got {other:?}"),
    }
}

#[test]
fn missing_fulfiller_is_unsupported() {
    let follower = Follower::new();
    *follower.fulfiller.lock() = None;
    let mut unpacker = follower.unpacker(UnpackerConfig::default());

    let err = unpacker
        .unpack_response(Response::obligation(3), handler())
        .unwrap_err();
    assert!(matches!(err, ReplicaError::Unsupported(_)));
}

#[test]
fn start_resolves_the_current_fulfiller() {
    let follower = Follower::new();
    *follower.fulfiller.lock() = None;
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    assert!(unpacker
        .unpack_response(Response::obligation(3), handler())
        .is_err());

    let scripted = Arc::new(ScriptedFulfiller::default());
    *follower.fulfiller.lock() = Some(scripted.clone() as Arc<dyn ObligationFulfiller>);
    unpacker.start().unwrap();
    assert_eq!(unpacker.state(), LifecycleState::Started);
    unpacker
        .unpack_response(Response::obligation(3), handler())
        .unwrap();
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_rejects_obligations() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    unpacker.shutdown();

    let err = unpacker
        .unpack_response(Response::obligation(3), handler())
        .unwrap_err();
    assert!(matches!(err, ReplicaError::Stopped));
    assert!(unpacker.start().is_err());
}
