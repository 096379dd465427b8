#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use sombra_replica::{
    ChangeKind, CommittedTransaction, RecordChange, RecordKind, Response, ResponseUnpacker,
    TransactionRepresentation, TransactionStream, UnpackerConfig,
};
use support::{tx, txs, Follower, RecordingHandler};

#[test]
fn passes_run_in_strict_order() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    let handler = Arc::new(RecordingHandler::default());

    unpacker
        .unpack_response(Response::transactions(txs(2, 3, 1_000)), handler.clone())
        .unwrap();

    assert_eq!(
        follower.journal.events(),
        vec![
            "freeze",
            "rotate",
            "append 2",
            "append 3",
            "append 4",
            "force",
            "apply 2",
            "apply 3",
            "apply 4",
            "close_batch",
            "close 2",
            "close 3",
            "close 4",
            "unfreeze",
        ]
    );
    assert_eq!(*handler.seen.lock(), vec![2, 3, 4]);
    assert_eq!(follower.ids.last_committed(), 4);
    assert_eq!(follower.ids.last_closed(), 4);
}

#[test]
fn large_response_is_split_at_batch_size() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default().max_batch_size(100));

    unpacker
        .unpack_response(
            Response::transactions(txs(2, 250, 10_000)),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap();

    assert_eq!(follower.journal.count("force"), 3);
    assert_eq!(follower.journal.count("close_batch"), 3);
    let snapshot = follower.metrics.snapshot();
    assert_eq!(snapshot.batches, 3);
    assert_eq!(snapshot.transactions, 250);

    let events = follower.journal.events();
    let forces: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == "force")
        .map(|(i, _)| i)
        .collect();
    let appends_before = |end: usize| events[..end].iter().filter(|e| e.starts_with("append")).count();
    assert_eq!(appends_before(forces[0]), 100);
    assert_eq!(appends_before(forces[1]), 200);
    assert_eq!(appends_before(forces[2]), 250);
    assert_eq!(follower.ids.last_closed(), 251);
}

#[test]
fn batch_runs_before_the_rest_of_the_stream_is_read() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default().max_batch_size(2));
    let observer = Arc::clone(&follower);
    let stream = TransactionStream::new((2..=5).map(move |id| {
        // By the time tx 4 is read, the first batch has been closed.
        if id == 4 {
            assert_eq!(observer.ids.last_closed(), 3);
        }
        Ok(tx(id, 100 + id))
    }));

    unpacker
        .unpack_response(
            Response::Transactions(stream),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap();
    assert_eq!(follower.ids.last_closed(), 5);
}

#[test]
fn empty_stream_runs_no_pipeline() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());

    unpacker
        .unpack_response(
            Response::transactions(Vec::new()),
            Arc::new(RecordingHandler::default()),
        )
        .unwrap();

    assert!(follower.journal.events().is_empty());
    assert_eq!(follower.metrics.snapshot().batches, 0);
}

#[test]
fn record_locks_live_for_one_transaction() {
    let follower = Follower::new();
    let mut unpacker = follower.unpacker(UnpackerConfig::default());
    let changes = vec![
        RecordChange::new(RecordKind::Node, 7, ChangeKind::Create),
        RecordChange::new(RecordKind::Property, 9, ChangeKind::Update),
    ];
    let transaction = CommittedTransaction::new(
        2,
        50,
        TransactionRepresentation::new(changes).with_time_committed(50),
    );
    let store = Arc::clone(&follower.store);
    let log_file = Arc::clone(&follower.log_file);
    let handler = move |_: &CommittedTransaction| {
        assert!(store.is_record_locked(RecordKind::Node, 7));
        assert!(log_file.is_locked());
    };

    unpacker
        .unpack_response(Response::transactions(vec![transaction]), Arc::new(handler))
        .unwrap();

    assert!(follower.journal.contains("validate index"));
    assert_eq!(follower.ids.last_committed_timestamp(), 50);
    assert!(follower.store.max_locks_held.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    assert!(!follower.store.is_record_locked(RecordKind::Node, 7));
    assert!(!follower.store.is_record_locked(RecordKind::Property, 9));
    assert!(!follower.log_file.is_locked());
}
