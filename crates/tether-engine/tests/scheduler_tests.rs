//! Integration tests for main-thread scheduling

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use common::*;
use parking_lot::Mutex;
use tether_engine::{Bridge, HeadlessLoop, HeadlessRuntime};

fn setup_with_loop() -> (Arc<Bridge>, Arc<HeadlessLoop>) {
    init_tracing();
    let event_loop = HeadlessLoop::new();
    let bridge = Bridge::new(HeadlessRuntime::new(), event_loop.clone());
    (bridge, event_loop)
}

#[test]
fn test_jobs_run_on_main_in_order() {
    let (bridge, event_loop) = setup_with_loop();
    let main = thread::current().id();
    let order = Arc::new(Mutex::new(Vec::new()));

    bridge.run(|| {
        thread::scope(|scope| {
            for worker in 0..4usize {
                let bridge = &bridge;
                let order = &order;
                scope.spawn(move || {
                    for step in 0..25usize {
                        let order = order.clone();
                        let ran_on = bridge.run_on_main(move || {
                            order.lock().push((worker, step));
                            thread::current().id()
                        });
                        assert_eq!(ran_on, main);
                    }
                });
            }
        });
    });

    let order = order.lock();
    assert_eq!(order.len(), 100);
    for worker in 0..4 {
        let steps: Vec<_> = order.iter().filter(|(w, _)| *w == worker).map(|(_, s)| *s).collect();
        assert_eq!(steps, (0..25).collect::<Vec<_>>());
    }
    assert!(event_loop.is_initialized());
    assert!(event_loop.armed_count() > 0);
}

#[test]
fn test_run_returns_driver_result() {
    let (bridge, _event_loop) = setup_with_loop();
    assert!(!bridge.scheduler().is_ready());
    let answer = bridge.run(|| bridge.run_on_main(|| 6 * 7));
    assert_eq!(answer, 42);
    assert!(bridge.scheduler().is_ready());
}

#[test]
fn test_callers_wait_for_the_loop() {
    let (bridge, _event_loop) = setup_with_loop();
    let early = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.run_on_main(|| "served"))
    };
    let served = bridge.run(move || early.join().unwrap());
    assert_eq!(served, "served");
}

#[test]
fn test_inline_on_main_thread() {
    let (bridge, _event_loop) = setup_with_loop();
    let here = thread::current().id();
    assert_eq!(bridge.run_on_main(move || thread::current().id()), here);
}

#[test]
fn test_lock_holds_main_thread_for_queued_work() {
    let (bridge, _event_loop) = setup_with_loop();
    let count = Arc::new(Mutex::new(0));

    bridge.run(|| {
        bridge.lock();
        assert_eq!(bridge.scheduler().lock_depth(), 1);
        thread::scope(|scope| {
            for _ in 0..3 {
                let bridge = &bridge;
                let count = count.clone();
                scope.spawn(move || {
                    for _ in 0..10 {
                        let count = count.clone();
                        bridge.run_on_main(move || *count.lock() += 1);
                    }
                });
            }
        });
        bridge.unlock();
        assert_eq!(bridge.scheduler().lock_depth(), 0);
    });
    assert_eq!(*count.lock(), 30);
}

#[test]
fn test_nested_locks() {
    let (bridge, _event_loop) = setup_with_loop();
    bridge.run(|| {
        bridge.lock();
        bridge.lock();
        bridge.unlock();
        assert_eq!(bridge.scheduler().lock_depth(), 1);
        bridge.unlock();
    });
    assert_eq!(bridge.scheduler().lock_depth(), 0);
}

#[test]
#[should_panic(expected = "without a matching lock")]
fn test_unbalanced_unlock_is_fatal() {
    let (bridge, _event_loop) = setup_with_loop();
    bridge.run(|| bridge.unlock());
}

#[test]
fn test_flush() {
    let (bridge, event_loop) = setup_with_loop();
    bridge.flush();
    assert_eq!(event_loop.flush_count(), 1);
    bridge.run(|| bridge.flush());
    assert_eq!(event_loop.flush_count(), 2);
}

#[test]
#[should_panic(expected = "run called more than once")]
fn test_run_twice_is_fatal() {
    let (bridge, _event_loop) = setup_with_loop();
    bridge.run(|| ());
    bridge.run(|| ());
}

#[test]
fn test_job_panic_resumes_in_caller() {
    let (bridge, _event_loop) = setup_with_loop();
    let after = bridge.run(|| {
        let failed = panic::catch_unwind(AssertUnwindSafe(|| {
            bridge.run_on_main(|| panic!("job failed"));
        }));
        assert!(failed.is_err());
        // The loop keeps serving after a failed job.
        bridge.run_on_main(|| "still running")
    });
    assert_eq!(after, "still running");
}

#[test]
fn test_engines_from_worker_threads() {
    let (bridge, _event_loop) = setup_with_loop();
    bridge.run(|| {
        let engine = bridge.new_engine();
        assert_eq!(bridge.stats().engines, 1);
        bridge.destroy_engine(engine);
        assert_eq!(bridge.stats().engines, 0);
    });
}
