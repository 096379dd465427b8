#![allow(missing_docs)]

mod support;

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sombra_replica::{
    BatchStep, ChangeKind, CommittedTransaction, LockGroup, RecordChange, RecordKind,
    ReplicaError, Response, ResponseUnpacker, TransactionRepresentation, TransactionStream,
    UnpackerConfig, KERNEL_PANIC_MESSAGE,
};
use support::{tx, txs, Follower, RecordingHandler};

#[test]
fn apply_failure_panics_kernel_once_and_closes_nothing_after_it() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    *follower.store.fail_apply_at.lock() = Some(4);
    let handler = Arc::new(RecordingHandler::default());

    let err = unpacker
        .unpack_response(Response::transactions(txs(2, 5, 500)), handler.clone())
        .unwrap_err();

    match &err {
        ReplicaError::Batch { step, tx_id, .. } => {
            assert_eq!(*step, BatchStep::Apply);
            assert_eq!(*tx_id, 4);
        }
        other => panic!("expected batch failure, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert!(!follower.health.is_healthy());
    assert_eq!(follower.health.panic_count(), 1);
    assert_eq!(follower.metrics.snapshot().panics, 1);

    assert_eq!(*handler.seen.lock(), vec![2, 3]);
    assert_eq!(follower.journal.starting_with("close "), vec!["close 2", "close 3", "close 4"]);
    assert!(!follower.journal.contains("close_batch"));
    let failed_at = follower.journal.position("close 4").unwrap();
    assert_eq!(follower.journal.position("unfreeze"), Some(failed_at + 1));
    assert_eq!(follower.ids.last_closed(), 4);
}

#[test]
fn commit_failure_skips_force_and_apply() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    *follower.log.fail_append_at.lock() = Some(3);

    let err = unpacker
        .unpack_response(
            Response::transactions(txs(2, 3, 500)),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        ReplicaError::Batch {
            step: BatchStep::Commit,
            tx_id: 3,
            ..
        }
    ));
    assert_eq!(follower.journal.starting_with("append"), vec!["append 2"]);
    assert!(!follower.journal.contains("force"));
    assert!(follower.journal.starting_with("apply").is_empty());
    assert!(follower.journal.starting_with("close").is_empty());
    assert_eq!(follower.health.panic_count(), 1);
}

fn touching(tx_id: u64, change: RecordChange) -> CommittedTransaction {
    CommittedTransaction::new(
        tx_id,
        500,
        TransactionRepresentation::new(vec![change]).with_time_committed(500),
    )
}

#[test]
fn rejected_index_update_fails_the_apply_step() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    follower.store.reject_index_updates.store(true, Ordering::SeqCst);

    let err = unpacker
        .unpack_response(
            Response::transactions(vec![
                tx(2, 500),
                touching(3, RecordChange::new(RecordKind::Label, 4, ChangeKind::Create)),
            ]),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();

    match &err {
        ReplicaError::Batch {
            step: BatchStep::Apply,
            tx_id: 3,
            source,
        } => assert!(matches!(**source, ReplicaError::Index(_))),
        other => panic!("expected index failure during apply, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert_eq!(follower.journal.starting_with("apply"), vec!["apply 2"]);
    assert_eq!(follower.journal.starting_with("close "), vec!["close 2", "close 3"]);
    assert_eq!(follower.health.panic_count(), 1);
}

#[test]
fn record_held_by_local_writer_fails_the_apply_step() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    *follower.store.lock_wait.lock() = Duration::from_millis(10);
    let mut writer = LockGroup::new();
    follower.store.lock_record(RecordKind::Node, 8, &mut writer);

    let err = unpacker
        .unpack_response(
            Response::transactions(vec![touching(
                2,
                RecordChange::new(RecordKind::Node, 8, ChangeKind::Update),
            )]),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();

    match &err {
        ReplicaError::Batch {
            step: BatchStep::Apply,
            tx_id: 2,
            source,
        } => assert!(matches!(**source, ReplicaError::Lock(_))),
        other => panic!("expected lock failure during apply, got {other:?}"),
    }
    assert!(follower.journal.starting_with("apply").is_empty());
    assert!(!follower.health.is_healthy());
    drop(writer);
    assert!(!follower.store.is_record_locked(RecordKind::Node, 8));
}

#[test]
fn unhealthy_kernel_refuses_batches_and_keeps_the_cause() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    follower
        .health
        .panic(&ReplicaError::Store("checksum mismatch".into()));

    for _ in 0..2 {
        // Same ids twice: the refused batch must not linger in the queue.
        let err = unpacker
            .unpack_response(
                Response::transactions(txs(2, 3, 500)),
                Arc::new(RecordingHandler::default()),
            )
            .unwrap_err();
        match err {
            ReplicaError::KernelPanic { cause } => {
                assert!(cause.message().contains("checksum mismatch"));
            }
            other => panic!("expected kernel panic refusal, got {other:?}"),
        }
    }

    let refusal = follower.health.assert_healthy().unwrap_err().to_string();
    assert_eq!(refusal, KERNEL_PANIC_MESSAGE);
    assert_eq!(follower.journal.count("rotate"), 2);
    assert!(follower.journal.starting_with("append").is_empty());
    assert_eq!(follower.health.panic_count(), 1);
    assert_eq!(follower.journal.count("freeze"), follower.journal.count("unfreeze"));
}

#[test]
fn rotation_failure_is_not_fatal_and_clears_the_queue() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    follower.log.fail_rotation.store(true, Ordering::SeqCst);

    let err = unpacker
        .unpack_response(
            Response::transactions(txs(2, 2, 500)),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();
    assert!(matches!(err, ReplicaError::Log(_)));
    assert!(follower.health.is_healthy());

    follower.log.fail_rotation.store(false, Ordering::SeqCst);
    unpacker
        .unpack_response(
            Response::transactions(txs(2, 2, 500)),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap();
    assert_eq!(*follower.store.applied.lock(), vec![2, 3]);
}

#[test]
fn stream_failure_still_flushes_what_was_queued() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    let stream = TransactionStream::new(vec![
        Ok(tx(2, 100)),
        Ok(tx(3, 101)),
        Err(ReplicaError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated response",
        ))),
        Ok(tx(4, 102)),
    ]);

    let err = unpacker
        .unpack_response(
            Response::Transactions(stream),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();

    assert!(matches!(err, ReplicaError::Io(ref source) if source.kind() == io::ErrorKind::UnexpectedEof));
    assert_eq!(*follower.store.applied.lock(), vec![2, 3]);
    assert_eq!(follower.ids.last_closed(), 3);
}

#[test]
fn flush_failure_outranks_stream_failure() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    *follower.store.fail_apply_at.lock() = Some(2);
    let stream = TransactionStream::new(vec![
        Ok(tx(2, 100)),
        Err(ReplicaError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "primary went away",
        ))),
    ]);

    let err = unpacker
        .unpack_response(
            Response::Transactions(stream),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        ReplicaError::Batch {
            step: BatchStep::Apply,
            tx_id: 2,
            ..
        }
    ));
    assert!(err.is_fatal());
    assert!(!follower.health.is_healthy());
    assert_eq!(follower.health.panic_count(), 1);
}

#[test]
fn stop_from_another_thread_gates_later_responses() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    let lifecycle = unpacker.lifecycle_handle();
    thread::spawn(move || lifecycle.stop()).join().unwrap();

    let err = unpacker
        .unpack_response(
            Response::transactions(txs(2, 1, 100)),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap_err();
    assert!(matches!(err, ReplicaError::Stopped));
    assert!(follower.journal.events().is_empty());
}
