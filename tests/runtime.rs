//! End-to-end tests for loop groups, promises, and scheduling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use eventline::{Config, ConfigBuilder, Error, EventLoopGroup, WaitError};

fn group(loops: usize) -> EventLoopGroup {
    let config = ConfigBuilder::new()
        .loops(loops)
        .build()
        .expect("valid config");
    EventLoopGroup::new(config).expect("group construction")
}

#[test]
fn submit_returns_value() {
    let group = group(1);
    let task = group.submit(|| 6 * 7).expect("submit");
    assert_eq!(task.promise().wait_result().expect("result"), 42);
    group.shutdown_gracefully();
}

#[test]
fn tasks_run_in_submission_order() {
    let group = group(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    for i in 0..100 {
        let order = Arc::clone(&order);
        let tx = tx.clone();
        group
            .execute(move || {
                order.lock().unwrap().push(i);
                if i == 99 {
                    tx.send(()).unwrap();
                }
            })
            .expect("execute");
    }
    rx.recv_timeout(Duration::from_secs(5)).expect("completion");
    assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
    group.shutdown_gracefully();
}

#[test]
fn round_robin_spreads_over_loops() {
    let group = group(2);
    let first = group.submit(|| std::thread::current().name().map(String::from));
    let second = group.submit(|| std::thread::current().name().map(String::from));
    let a = first.expect("submit").promise().wait_result().expect("a");
    let b = second.expect("submit").promise().wait_result().expect("b");
    assert_ne!(a, b);
    group.shutdown_gracefully();
}

#[test]
fn scheduled_tasks_fire_in_deadline_order() {
    let group = group(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let slow = {
        let order = Arc::clone(&order);
        group
            .schedule(Duration::from_millis(60), move || {
                order.lock().unwrap().push("slow");
            })
            .expect("schedule")
    };
    let fast = {
        let order = Arc::clone(&order);
        group
            .schedule(Duration::from_millis(10), move || {
                order.lock().unwrap().push("fast");
            })
            .expect("schedule")
    };
    fast.promise().await_done().expect("fast");
    slow.promise().await_done().expect("slow");
    assert_eq!(*order.lock().unwrap(), vec!["fast", "slow"]);
    group.shutdown_gracefully();
}

#[test]
fn await_timeout_reports_completion() {
    let group = group(1);
    let task = group
        .schedule(Duration::from_millis(50), || {})
        .expect("schedule");
    // completes at ~50ms, well inside the 1s wait
    assert!(task.promise().await_timeout(Duration::from_secs(1)).expect("wait"));
    group.shutdown_gracefully();
}

#[test]
fn await_timeout_expires_without_completion() {
    let group = group(1);
    let task = group
        .schedule(Duration::from_secs(60), || {})
        .expect("schedule");
    let start = Instant::now();
    let done = task
        .promise()
        .await_timeout(Duration::from_millis(100))
        .expect("wait");
    assert!(!done);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(!task.promise().is_done());
    task.cancel().expect("cancel");
    group.shutdown_gracefully();
}

#[test]
fn cancelled_task_reports_cancellation_not_generic_failure() {
    let group = group(1);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    // hold the loop so the second task stays queued
    group
        .execute(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        })
        .expect("execute");
    let task = group.submit(|| 1).expect("submit");
    task.cancel().expect("first cancel");
    gate_tx.send(()).unwrap();

    match task.promise().wait_result() {
        Err(WaitError::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(task.promise().is_cancelled());
    assert!(matches!(task.cancel(), Err(Error::IllegalState(_))));
    group.shutdown_gracefully();
}

#[test]
fn graceful_shutdown_drains_queued_tasks() {
    let group = group(1);
    let executed = Arc::new(AtomicUsize::new(0));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    group
        .execute(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        })
        .expect("execute");
    for _ in 0..3 {
        let executed = Arc::clone(&executed);
        group
            .execute(move || {
                executed.fetch_add(1, Ordering::SeqCst);
            })
            .expect("execute");
    }
    assert!(group.shutdown_gracefully_with(Duration::ZERO, Duration::from_secs(5)));
    gate_tx.send(()).unwrap();
    assert!(group.await_terminated(Duration::from_secs(10)));
    assert_eq!(executed.load(Ordering::SeqCst), 3);
}

#[test]
fn submissions_after_shutdown_are_rejected() {
    let group = group(1);
    group.shutdown_gracefully_with(Duration::ZERO, Duration::from_secs(1));
    assert!(group.await_terminated(Duration::from_secs(10)));
    assert!(matches!(group.execute(|| {}), Err(Error::Rejected)));
}

#[test]
fn completing_twice_is_an_error() {
    let group = group(1);
    let task = group.submit(|| "done").expect("submit");
    task.promise().await_done().expect("completion");
    assert!(matches!(
        task.promise().set_success("again"),
        Err(Error::IllegalState(_))
    ));
    assert!(matches!(
        task.promise().set_failure(Error::Rejected),
        Err(Error::IllegalState(_))
    ));
    group.shutdown_gracefully();
}

#[test]
fn late_listeners_fire_exactly_once() {
    let group = group(1);
    let task = group.submit(|| 5).expect("submit");
    task.promise().await_done().expect("completion");

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    {
        let fired = Arc::clone(&fired);
        let tx = tx.clone();
        task.promise().add_listener(move |promise| {
            fired.fetch_add(1, Ordering::SeqCst);
            // registering from inside a notification must still fire
            let fired = Arc::clone(&fired);
            let tx = tx.clone();
            promise.add_listener(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        });
    }
    rx.recv_timeout(Duration::from_secs(5)).expect("nested listener");
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    group.shutdown_gracefully();
}

#[test]
fn panicking_task_fails_its_promise_and_loop_survives() {
    let group = group(1);
    let boom = group.submit(|| panic!("kaboom")).expect("submit");
    match boom.promise().wait_result() {
        Err(WaitError::Failed(cause)) => {
            assert!(matches!(*cause, Error::HandlerPanic(ref msg) if msg.contains("kaboom")));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // the loop keeps executing
    let after = group.submit(|| 7).expect("submit");
    assert_eq!(after.promise().wait_result().expect("result"), 7);
    group.shutdown_gracefully();
}

#[test]
fn zero_loops_defaults_to_cpu_count() {
    let group = EventLoopGroup::new(Config::default()).expect("group");
    assert!(!group.is_empty());
    group.shutdown_gracefully();
}
