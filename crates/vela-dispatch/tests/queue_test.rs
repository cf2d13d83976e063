//! Engine queue integration tests

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use vela_dispatch::{CallbackDispatcher, DispatchError, EngineQueue, EngineState};
use vela_handle::OwnerId;
use vela_value::{Callback, Invocation, ScriptValue};

#[derive(Default)]
struct Log {
    entries: RefCell<Vec<(u32, u32)>>,
    dispatcher: RefCell<CallbackDispatcher>,
}

impl EngineState for Log {}

fn start() -> EngineQueue<Log> {
    EngineQueue::start("queue-test", || Ok::<_, DispatchError>(Rc::new(Log::default()))).unwrap()
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_jobs_from_one_thread_run_in_order() {
    let queue = start();
    for i in 0..100 {
        queue
            .post(move |log| log.entries.borrow_mut().push((0, i)))
            .unwrap();
    }

    let entries = queue.call(|log| log.entries.borrow().clone()).unwrap();
    let expected: Vec<(u32, u32)> = (0..100).map(|i| (0, i)).collect();
    assert_eq!(entries, expected);
    queue.shutdown();
}

#[test]
fn test_producers_keep_their_own_order() {
    let queue = start();
    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    queue
                        .post(move |log| log.entries.borrow_mut().push((producer, i)))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let entries = queue.call(|log| log.entries.borrow().clone()).unwrap();
    assert_eq!(entries.len(), 200);
    for producer in 0..4 {
        let seen: Vec<u32> = entries
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(seen, (0..50).collect::<Vec<u32>>());
    }
    queue.shutdown();
}

#[test]
fn test_shutdown_runs_already_queued_jobs() {
    let queue = start();
    let (tx, rx) = std::sync::mpsc::channel();
    for i in 0..10 {
        let tx = tx.clone();
        queue.post(move |_| tx.send(i).unwrap()).unwrap();
    }
    drop(tx);
    queue.shutdown();

    assert_eq!(rx.iter().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
}

// ============================================================================
// DISPATCH
// ============================================================================

#[test]
fn test_callback_runs_synchronously_on_engine_thread() {
    let queue = start();
    let callback: Callback = Arc::new(|inv: &Invocation| {
        let name = thread::current().name().map(str::to_owned).unwrap_or_default();
        Ok::<_, ScriptValue>(ScriptValue::from(format!("{}:{}", name, inv.arg(0))))
    });

    let result = queue
        .call(move |log| {
            let token = log
                .dispatcher
                .borrow_mut()
                .register(OwnerId(1), Some("where"), callback)
                .unwrap();
            let resolved = log.dispatcher.borrow_mut().resolve(token).unwrap();
            (resolved.callback)(&Invocation::new(ScriptValue::Undefined, vec![ScriptValue::from(7)]))
        })
        .unwrap();

    assert_eq!(result, Ok(ScriptValue::from("queue-test:7")));
    queue.shutdown();
}

#[test]
fn test_invalidated_owner_drops_queued_invocation() {
    let queue = start();
    let callback: Callback = Arc::new(|_: &Invocation| Ok::<_, ScriptValue>(ScriptValue::Null));
    let token = queue
        .call(move |log| {
            log.dispatcher
                .borrow_mut()
                .register(OwnerId(9), None, callback)
                .unwrap()
        })
        .unwrap();

    queue
        .post(|log| {
            log.dispatcher.borrow_mut().invalidate_owner(OwnerId(9));
        })
        .unwrap();
    let outcome = queue
        .call(move |log| log.dispatcher.borrow_mut().resolve(token).map(|_| ()))
        .unwrap();

    assert_eq!(outcome, Err(DispatchError::StaleCallback(token)));
    queue.shutdown();
}
