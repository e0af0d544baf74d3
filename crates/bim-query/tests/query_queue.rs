mod common;

use bim_query::{
    NoGraphicsPriority, Processor, QueryConfig, QueryError, QueryOutcome, QueryQueue, QueryState,
    QueueState,
};
use common::{index, query_model, CountingLoader, GateIndex, TrippingIndex};
use std::thread;
use std::time::Duration;

fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached");
}

#[test]
fn pending_requests_are_deduplicated_in_fifo_order() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(8);
    let blocker = query_model(1, gate_index, CountingLoader::new(1));
    let second = query_model(2, index(8), CountingLoader::new(1));
    let third = query_model(3, index(8), CountingLoader::new(1));

    queue.request_processing(blocker.clone()).expect("request blocker");
    gate.wait_entered();
    queue.request_processing(second.clone()).expect("request second");
    queue.request_processing(third.clone()).expect("request third");
    queue.request_processing(second.clone()).expect("re-request second");

    assert_eq!(queue.pending_models(), vec![third.id(), second.id()]);
    assert_eq!(queue.state(blocker.id()), QueryState::Processing);
    assert_eq!(queue.state(second.id()), QueryState::Pending);
    assert!(!queue.is_idle());

    gate.open();
    queue.wait_until_idle();
    for model in [&blocker, &second, &third] {
        assert_eq!(queue.state(model.id()), QueryState::Idle);
        assert!(model.take_updated_results().is_some());
    }
}

#[test]
fn abort_of_pending_request_removes_it() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(4);
    let blocker = query_model(1, gate_index, CountingLoader::new(1));
    let queued = query_model(2, index(4), CountingLoader::new(1));

    queue.request_processing(blocker.clone()).expect("request blocker");
    gate.wait_entered();
    queue.request_processing(queued.clone()).expect("request queued");
    queue.request_abort(&queued, false);

    assert_eq!(queue.state(queued.id()), QueryState::Idle);
    assert!(queue.pending_models().is_empty());
    assert!(!queued.is_abort_requested());

    gate.open();
    queue.wait_until_idle();
    assert!(queued.take_updated_results().is_none());
    assert!(blocker.take_updated_results().is_some());
}

#[test]
fn abort_while_processing_waits_for_idle() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(12);
    let model = query_model(1, gate_index, CountingLoader::new(1));

    queue.request_processing(model.clone()).expect("request");
    gate.wait_entered();

    thread::scope(|scope| {
        let aborter = scope.spawn(|| queue.request_abort(&model, true));
        wait_for(|| queue.state(model.id()) == QueryState::AbortRequested);
        assert!(model.is_abort_requested());
        gate.open();
        aborter.join().expect("abort thread");
    });

    assert_eq!(queue.state(model.id()), QueryState::Idle);
    assert!(model.take_updated_results().is_none());
}

#[test]
fn request_during_processing_runs_again() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(6);
    let model = query_model(1, gate_index, CountingLoader::new(1));

    queue.request_processing(model.clone()).expect("request");
    gate.wait_entered();
    queue.request_processing(model.clone()).expect("request again");
    assert_eq!(queue.state(model.id()), QueryState::Pending);

    gate.open();
    gate.wait_entered();
    assert_eq!(queue.state(model.id()), QueryState::Processing);
    gate.open();
    queue.wait_until_idle();

    assert_eq!(queue.state(model.id()), QueryState::Idle);
    assert!(model.take_updated_results().is_some());
}

#[test]
fn abort_of_requeued_model_also_stops_running_query() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(6);
    let model = query_model(1, gate_index, CountingLoader::new(1));

    queue.request_processing(model.clone()).expect("request");
    gate.wait_entered();
    queue.request_processing(model.clone()).expect("request again");
    queue.request_abort(&model, false);

    assert_eq!(queue.state(model.id()), QueryState::AbortRequested);
    assert!(queue.pending_models().is_empty());

    gate.open();
    queue.wait_until_idle();
    assert_eq!(queue.state(model.id()), QueryState::Idle);
    assert!(model.take_updated_results().is_none());
}

#[test]
fn worker_hand_off_matches_direct_run() {
    let config = QueryConfig::default();
    let direct = query_model(1, index(30), CountingLoader::new(1));
    let queued = query_model(2, index(30), CountingLoader::new(1));

    let outcome = Processor::new(&direct, &config, &NoGraphicsPriority)
        .run()
        .expect("direct run");
    let QueryOutcome::Completed(expected) = outcome else {
        panic!("direct run was aborted");
    };

    let queue = QueryQueue::start(config).expect("start queue");
    queue.request_processing(queued.clone()).expect("request");
    queue.wait_until_idle();
    let handed_off = queued.take_updated_results().expect("handed-off results");

    assert_eq!(handed_off.primary, expected.primary);
    assert_eq!(handed_off.secondary, expected.secondary);
    assert_eq!(handed_off.reached_max, expected.reached_max);
}

#[test]
fn aborted_walk_hands_off_nothing() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let tripping = TrippingIndex::new(30, 3);
    let loader = CountingLoader::new(1);
    let model = query_model(1, tripping.clone(), loader.clone());
    tripping.arm(&model);

    queue.request_processing(model.clone()).expect("request");
    queue.wait_until_idle();

    assert_eq!(queue.state(model.id()), QueryState::Idle);
    assert!(model.take_updated_results().is_none());
    assert_eq!(loader.loads(), 0);
}

#[test]
fn terminate_aborts_running_query_and_drops_queue() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(6);
    let running = query_model(1, gate_index, CountingLoader::new(1));
    let queued = query_model(2, index(6), CountingLoader::new(1));

    queue.request_processing(running.clone()).expect("request running");
    gate.wait_entered();
    queue.request_processing(queued.clone()).expect("request queued");

    thread::scope(|scope| {
        let terminator = scope.spawn(|| queue.terminate());
        wait_for(|| queue.queue_state() == QueueState::TerminateRequested);
        assert!(running.is_abort_requested());
        assert_eq!(queue.state(queued.id()), QueryState::Idle);
        gate.open();
        terminator.join().expect("terminate thread");
    });

    assert_eq!(queue.queue_state(), QueueState::Terminated);
    assert_eq!(queue.state(running.id()), QueryState::Idle);
    assert!(running.take_updated_results().is_none());
    assert!(queued.take_updated_results().is_none());
    let err = queue
        .request_processing(queued)
        .expect_err("terminated queue refuses work");
    assert!(matches!(err, QueryError::QueueTerminated));
}

#[test]
fn progressive_access_excludes_the_worker() {
    let queue = QueryQueue::start(QueryConfig::default()).expect("start queue");
    let (gate_index, gate) = GateIndex::new(4);
    let blocker = query_model(1, gate_index, CountingLoader::new(1));
    let later = query_model(2, index(4), CountingLoader::new(1));

    queue.request_processing(blocker.clone()).expect("request blocker");
    gate.wait_entered();
    assert!(queue.try_progressive_access().is_none());
    gate.open();
    queue.wait_until_idle();

    let access = queue
        .try_progressive_access()
        .expect("idle queue grants access");
    queue.request_processing(later.clone()).expect("request later");
    thread::sleep(Duration::from_millis(20));
    assert!(!later.has_updated_results());
    assert!(!queue.is_idle());

    drop(access);
    queue.wait_until_idle();
    assert!(later.take_updated_results().is_some());
}
