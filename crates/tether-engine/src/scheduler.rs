//! Main-thread scheduler
//!
//! Native logic runs on one thread: the thread that created the bridge and
//! later calls [`Scheduler::run`]. Other threads hand closures to
//! [`Scheduler::run_on_main`], which queues them FIFO and blocks until they
//! complete. The event loop drains the queue through the idle callback.
//!
//! The render callback may run on a separate render thread. Its identity is
//! tracked so that work issued from inside it runs inline.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tether_sdk::{EventLoop, IdleHook};

use crate::fatal::fatal;

type Job = Box<dyn FnOnce() + Send>;

// ============================================================================
// Thread identity
// ============================================================================

static NEXT_THREAD_REF: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_REF: u64 = NEXT_THREAD_REF.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique, never-zero identifier of the calling thread.
pub fn current_thread_ref() -> u64 {
    THREAD_REF.with(|r| *r)
}

// ============================================================================
// Latch
// ============================================================================

/// One-shot gate opened once the event loop is initialized.
#[derive(Default)]
struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Serializes native work onto the main thread.
pub struct Scheduler {
    event_loop: Arc<dyn EventLoop>,
    /// Thread that created the scheduler
    main_ref: u64,
    /// Thread currently running the render callback, or zero
    paint_ref: AtomicU64,
    started: AtomicBool,
    ready: Latch,
    /// Callers waiting for their closure to run
    idle_run: AtomicI32,
    /// Balance of `lock` over `unlock`; only touched on the main thread
    lock_depth: AtomicUsize,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
}

impl Scheduler {
    /// Create a scheduler bound to the calling thread.
    pub fn new(event_loop: Arc<dyn EventLoop>) -> Self {
        let (jobs_tx, jobs_rx) = channel::unbounded();
        Self {
            event_loop,
            main_ref: current_thread_ref(),
            paint_ref: AtomicU64::new(0),
            started: AtomicBool::new(false),
            ready: Latch::default(),
            idle_run: AtomicI32::new(0),
            lock_depth: AtomicUsize::new(0),
            jobs_tx,
            jobs_rx,
        }
    }

    /// The event loop driven by this scheduler
    pub fn event_loop(&self) -> &Arc<dyn EventLoop> {
        &self.event_loop
    }

    /// True on the thread that created the scheduler.
    pub fn on_main(&self) -> bool {
        current_thread_ref() == self.main_ref
    }

    /// True while the calling thread runs the render callback.
    pub fn is_painting(&self) -> bool {
        self.paint_ref.load(Ordering::Acquire) == current_thread_ref()
    }

    /// Mark the calling thread as the render thread until the guard drops.
    pub fn enter_paint(&self) -> PaintGuard<'_> {
        self.paint_ref.store(current_thread_ref(), Ordering::Release);
        PaintGuard { scheduler: self }
    }

    /// True once the event loop is initialized
    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Current lock depth
    pub fn lock_depth(&self) -> usize {
        self.lock_depth.load(Ordering::Acquire)
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Initialize the event loop, run `driver` on a separate thread and
    /// service the loop on this one until `driver` returns.
    ///
    /// Must be called on the thread that created the scheduler, and once.
    pub fn run<R: Send>(&self, driver: impl FnOnce() -> R + Send) -> R {
        if !self.on_main() {
            fatal("run must be called on the thread that created the bridge");
        }
        if self.started.swap(true, Ordering::AcqRel) {
            fatal("run called more than once");
        }
        self.event_loop.init_application();
        self.event_loop.init_idle();
        self.ready.open();
        tracing::info!("event loop starting");

        // Disconnects when the driver returns or unwinds.
        let (finished_tx, finished_rx) = channel::bounded::<()>(0);
        let joined = thread::scope(|scope| {
            let driver = scope.spawn(|| {
                let _finished = finished_tx;
                let _exit = ExitOnDrop(self.event_loop.as_ref());
                let result = driver();
                let depth = self.lock_depth();
                if depth != 0 {
                    tracing::warn!(depth, "driver returned while the main thread is locked; the loop may never exit");
                }
                result
            });
            self.event_loop.exec(self);
            // The loop may return before the driver does; keep serving it.
            loop {
                channel::select! {
                    recv(self.jobs_rx) -> job => match job {
                        Ok(job) => self.run_job(job),
                        Err(_) => break,
                    },
                    recv(finished_rx) -> _ => break,
                }
            }
            driver.join()
        });

        tracing::info!("event loop exited");
        match joined {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Run `f` on the main thread and return its result.
    ///
    /// Runs inline on the main thread and on the active render thread.
    /// Otherwise waits for the loop to be initialized, queues `f` behind
    /// earlier requests and blocks until it completed. A panic inside `f`
    /// resumes in the caller.
    pub fn run_on_main<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.on_main() || self.is_painting() {
            return f();
        }
        self.ready.wait();

        let (done_tx, done_rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = done_tx.send(result);
        });
        if self.idle_run.fetch_add(1, Ordering::AcqRel) == 0 {
            self.event_loop.arm_idle();
        }
        if self.jobs_tx.send(job).is_err() {
            fatal("main-thread queue closed");
        }
        match done_rx.recv() {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => fatal("main-thread job dropped without completing"),
        }
    }

    fn run_job(&self, job: Job) {
        job();
        self.idle_run.fetch_sub(1, Ordering::AcqRel);
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Keep the idle callback draining (and waiting for) queued work until
    /// the matching [`Scheduler::unlock`].
    pub fn lock(self: &Arc<Self>) {
        let this = self.clone();
        self.run_on_main(move || {
            this.lock_depth.fetch_add(1, Ordering::AcqRel);
        });
    }

    /// Release one [`Scheduler::lock`]. Fatal when not locked.
    pub fn unlock(self: &Arc<Self>) {
        let this = self.clone();
        self.run_on_main(move || {
            if this.lock_depth.load(Ordering::Acquire) == 0 {
                fatal("unlock called without a matching lock");
            }
            this.lock_depth.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Process pending native activity on the main thread.
    pub fn flush(&self) {
        let event_loop = self.event_loop.clone();
        self.run_on_main(move || event_loop.flush_all());
    }
}

impl IdleHook for Scheduler {
    fn idle_pending(&self) -> bool {
        self.idle_run.load(Ordering::Acquire) > 0
    }

    fn on_idle(&self) {
        loop {
            match self.jobs_rx.try_recv() {
                Ok(job) => self.run_job(job),
                Err(TryRecvError::Empty) if self.lock_depth() > 0 => match self.jobs_rx.recv() {
                    Ok(job) => self.run_job(job),
                    Err(_) => return,
                },
                Err(_) => return,
            }
        }
    }
}

/// Clears the render thread identity when dropped.
pub struct PaintGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for PaintGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.paint_ref.store(0, Ordering::Release);
    }
}

struct ExitOnDrop<'a>(&'a dyn EventLoop);

impl Drop for ExitOnDrop<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessLoop;

    fn scheduler() -> Arc<Scheduler> {
        Arc::new(Scheduler::new(HeadlessLoop::new()))
    }

    #[test]
    fn test_thread_refs_differ() {
        let here = current_thread_ref();
        let there = thread::spawn(current_thread_ref).join().unwrap();
        assert_ne!(here, 0);
        assert_ne!(here, there);
        assert_eq!(here, current_thread_ref());
    }

    #[test]
    fn test_inline_on_main() {
        let scheduler = scheduler();
        assert!(scheduler.on_main());
        assert_eq!(scheduler.run_on_main(|| 7), 7);
    }

    #[test]
    fn test_paint_guard_clears() {
        let scheduler = scheduler();
        {
            let _guard = scheduler.enter_paint();
            assert!(scheduler.is_painting());
        }
        assert!(!scheduler.is_painting());
    }

    #[test]
    fn test_lock_balance() {
        let scheduler = scheduler();
        scheduler.lock();
        scheduler.lock();
        assert_eq!(scheduler.lock_depth(), 2);
        scheduler.unlock();
        scheduler.unlock();
        assert_eq!(scheduler.lock_depth(), 0);
    }

    #[test]
    #[should_panic(expected = "without a matching lock")]
    fn test_extra_unlock_is_fatal() {
        let scheduler = scheduler();
        scheduler.unlock();
    }

    #[test]
    fn test_run_returns_driver_result() {
        let scheduler = scheduler();
        let worker = scheduler.clone();
        let result = scheduler.run(move || worker.run_on_main(|| 40) + 2);
        assert_eq!(result, 42);
    }

    #[test]
    #[should_panic(expected = "thread that created the bridge")]
    fn test_run_off_main_is_fatal() {
        let scheduler = scheduler();
        let result = thread::spawn(move || scheduler.run(|| ())).join();
        if let Err(payload) = result {
            panic::resume_unwind(payload);
        }
    }

    /// A loop whose `exec` returns right away, leaving the driver unserved.
    #[derive(Default)]
    struct ShortLoop {
        execs: AtomicUsize,
    }

    impl EventLoop for ShortLoop {
        fn init_application(&self) {}
        fn init_idle(&self) {}
        fn arm_idle(&self) {}
        fn exec(&self, _idle: &dyn IdleHook) {
            self.execs.fetch_add(1, Ordering::AcqRel);
        }
        fn exit(&self) {}
        fn flush_all(&self) {}
    }

    #[test]
    fn test_jobs_served_after_loop_returns() {
        let event_loop = Arc::new(ShortLoop::default());
        let scheduler = Arc::new(Scheduler::new(event_loop.clone()));
        let worker = scheduler.clone();
        let total = scheduler.run(move || (1..=10).map(|n| worker.run_on_main(move || n)).sum::<i32>());
        assert_eq!(total, 55);
        assert_eq!(event_loop.execs.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_driver_returning_while_locked() {
        let scheduler = Arc::new(Scheduler::new(Arc::new(ShortLoop::default())));
        let worker = scheduler.clone();
        scheduler.run(move || worker.lock());
        assert_eq!(scheduler.lock_depth(), 1);
    }
}
