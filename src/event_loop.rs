//! Single-threaded event loops.
//!
//! Each [`EventLoop`] owns one OS thread (started lazily on first use),
//! one bounded FIFO task queue, and one scheduled-task priority queue.
//! Everything submitted to a loop runs strictly sequentially on that one
//! thread; this is the runtime's sole strong ordering guarantee. The
//! lifecycle is a monotonic CAS-driven state machine:
//!
//! ```text
//! NotStarted -> Started -> ShuttingDown -> Shutdown -> Terminated
//! ```
//!
//! Graceful shutdown drains every admitted task before reaching
//! `Shutdown`; past that point submission fails fast with a
//! rejected-execution error and tasks are never silently dropped without
//! being counted.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};

use crate::config::Config;
use crate::error::Error;
use crate::metrics;
use crate::promise::deadline_after;
use crate::queue::PriorityQueue;
use crate::task::{ScheduledTask, Task, deadline_for};

pub(crate) type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Queue envelope: real work, or a wakeup nudge. Nudges unblock the loop
/// thread without counting as activity toward the shutdown quiet period.
enum Envelope {
    Task(Runnable),
    Wake,
}

const NOT_STARTED: u8 = 0;
const STARTED: u8 = 1;
const SHUTTING_DOWN: u8 = 2;
const SHUTDOWN: u8 = 3;
const TERMINATED: u8 = 4;

/// How long the loop blocks waiting for work when no deadline is pending.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Lifecycle state of an [`EventLoop`]. Transitions are monotonic and
/// never skip a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoopState {
    NotStarted,
    Started,
    ShuttingDown,
    Shutdown,
    Terminated,
}

impl LoopState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            NOT_STARTED => LoopState::NotStarted,
            STARTED => LoopState::Started,
            SHUTTING_DOWN => LoopState::ShuttingDown,
            SHUTDOWN => LoopState::Shutdown,
            _ => LoopState::Terminated,
        }
    }
}

thread_local! {
    /// Id of the loop owning the current thread; `usize::MAX` when the
    /// thread is not a loop thread.
    static CURRENT_LOOP: Cell<usize> = const { Cell::new(usize::MAX) };
}

static NEXT_LOOP_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy)]
struct ShutdownTimes {
    quiet_period: Duration,
    timeout: Duration,
    start: Instant,
}

struct LoopInner {
    /// Globally unique id, compared against the thread-local marker for
    /// `in_event_loop`.
    id: usize,
    /// Position within the owning group; selects the metrics shard and
    /// the pinned core.
    index: usize,
    name: String,
    state: AtomicU8,
    tx: Sender<Envelope>,
    /// Taken exactly once by the loop thread at startup.
    rx: Mutex<Option<Receiver<Envelope>>>,
    sched: Mutex<PriorityQueue<ScheduledTask>>,
    sequence: AtomicU64,
    shutdown: Mutex<Option<ShutdownTimes>>,
    terminated: Mutex<bool>,
    terminated_cond: Condvar,
    pin_core: Option<usize>,
}

/// Handle to a single-threaded event loop. Cloning yields another handle
/// to the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

impl EventLoop {
    /// Create a loop (thread not yet started) using the given config.
    ///
    /// `index` is the loop's position within its group; it picks the
    /// thread name suffix, the metrics shard, and the pinned core.
    /// Usually called through [`EventLoopGroup`](crate::EventLoopGroup).
    pub fn new(config: &Config, index: usize) -> Result<EventLoop, Error> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::bounded(config.task_queue_capacity);
        let pin_core = config
            .worker
            .pin_to_core
            .then(|| config.worker.core_offset + index);
        Ok(EventLoop {
            inner: Arc::new(LoopInner {
                id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
                index,
                name: format!("{}-{}", config.worker.name_prefix, index),
                state: AtomicU8::new(NOT_STARTED),
                tx,
                rx: Mutex::new(Some(rx)),
                sched: Mutex::new(PriorityQueue::new()),
                sequence: AtomicU64::new(0),
                shutdown: Mutex::new(None),
                terminated: Mutex::new(false),
                terminated_cond: Condvar::new(),
                pin_core,
            }),
        })
    }

    /// The loop's thread name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        LoopState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the calling thread is this loop's own thread.
    ///
    /// Used pervasively to choose between direct invocation and
    /// cross-thread dispatch via [`execute`](Self::execute).
    pub fn in_event_loop(&self) -> bool {
        CURRENT_LOOP.get() == self.inner.id
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Enqueue a task for execution on the loop thread, starting the
    /// thread if this is the first submission.
    ///
    /// Fails with [`Error::Rejected`] once the loop has reached
    /// `Shutdown`, and with [`Error::QueueFull`] when the bounded queue
    /// is at capacity.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.submit_runnable(Box::new(f))
    }

    /// Enqueue a closure and return a typed [`Task`] settled with its
    /// return value.
    pub fn submit<V: Send + 'static>(
        &self,
        f: impl FnOnce() -> V + Send + 'static,
    ) -> Result<Task<V>, Error> {
        let task = Task::new(self, f);
        let runner = task.clone();
        self.execute(move || runner.run())?;
        Ok(task)
    }

    /// Schedule a closure to run after `delay` on the loop thread.
    ///
    /// Deadline arithmetic clamps on overflow instead of wrapping, so an
    /// absurd delay means "effectively never" rather than "immediately".
    pub fn schedule(
        &self,
        delay: Duration,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<ScheduledTask, Error> {
        self.schedule_at(deadline_for(Instant::now(), delay), f)
    }

    /// Schedule a closure to run at an absolute monotonic deadline.
    pub fn schedule_at(
        &self,
        deadline: Instant,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<ScheduledTask, Error> {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let task = ScheduledTask::new(self, deadline, sequence, f);
        if self.in_event_loop() {
            let _ = self.inner.sched.lock().offer(task.clone());
        } else {
            let lp = self.clone();
            let queued = task.clone();
            self.execute(move || {
                let _ = lp.inner.sched.lock().offer(queued);
            })?;
        }
        Ok(task)
    }

    /// Remove a cancelled scheduled task from the queue, hopping onto the
    /// loop thread if needed. The queue itself is only ever touched by
    /// the owning loop.
    pub(crate) fn purge_scheduled(&self, task: ScheduledTask) {
        if self.in_event_loop() {
            self.inner.sched.lock().remove(&task);
        } else {
            let lp = self.clone();
            let _ = self.execute(move || {
                lp.inner.sched.lock().remove(&task);
            });
        }
    }

    fn submit_runnable(&self, runnable: Runnable) -> Result<(), Error> {
        if let Err(e) = self.start() {
            metrics::TASKS_REJECTED.increment();
            return Err(e);
        }
        match self.inner.tx.try_send(Envelope::Task(runnable)) {
            Ok(()) => {
                // Re-check after the send: a submission racing the final
                // drain may have landed in a queue nobody will read again.
                // The loop may still run the task, which is benign; being
                // accepted and then lost is not.
                if self.inner.state.load(Ordering::Acquire) >= SHUTDOWN {
                    metrics::TASKS_REJECTED.increment();
                    return Err(Error::Rejected);
                }
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                metrics::TASKS_REJECTED.increment();
                Err(Error::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                metrics::TASKS_REJECTED.increment();
                Err(Error::Rejected)
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start the loop thread if not yet started. Only the first caller
    /// wins the CAS; later calls are no-ops. Submission is still
    /// admitted while `ShuttingDown` (those tasks are drained), and
    /// rejected from `Shutdown` onward.
    fn start(&self) -> Result<(), Error> {
        loop {
            match self.inner.state.load(Ordering::Acquire) {
                NOT_STARTED => {
                    if self
                        .inner
                        .state
                        .compare_exchange(NOT_STARTED, STARTED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return self.spawn_thread();
                    }
                    // Lost the race; re-check the new state.
                }
                STARTED | SHUTTING_DOWN => return Ok(()),
                _ => return Err(Error::Rejected),
            }
        }
    }

    fn spawn_thread(&self) -> Result<(), Error> {
        let rx = self
            .inner
            .rx
            .lock()
            .take()
            .ok_or(Error::IllegalState("loop thread already spawned"))?;
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || run_loop(inner, rx))
            .map_err(Error::Io)?;
        Ok(())
    }

    /// Request graceful shutdown. Does not block.
    ///
    /// The loop keeps draining tasks until `quiet_period` passes with no
    /// task executed or `timeout` elapses since the request, whichever
    /// comes first, then transitions through `Shutdown` to `Terminated`.
    /// Returns whether this call initiated the shutdown (false when the
    /// loop was already shutting down or farther along).
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> bool {
        let mut times = self.inner.shutdown.lock();
        let mut spawn_needed = false;
        loop {
            match self.inner.state.load(Ordering::Acquire) {
                NOT_STARTED => {
                    // Transitions never skip a state: step through Started.
                    // Winning this CAS also makes us responsible for the
                    // thread, since start() will now see Started and not
                    // spawn one.
                    if self
                        .inner
                        .state
                        .compare_exchange(
                            NOT_STARTED,
                            STARTED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        spawn_needed = true;
                    }
                }
                STARTED => {
                    if self
                        .inner
                        .state
                        .compare_exchange(
                            STARTED,
                            SHUTTING_DOWN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        break;
                    }
                }
                _ => return false,
            }
        }
        *times = Some(ShutdownTimes {
            quiet_period,
            timeout,
            start: Instant::now(),
        });
        drop(times);

        if spawn_needed {
            // Never ran; a thread is still needed to drain and terminate.
            if self.spawn_thread().is_err() {
                let _ = self.inner.state.compare_exchange(
                    SHUTTING_DOWN,
                    SHUTDOWN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                let _ = self.inner.state.compare_exchange(
                    SHUTDOWN,
                    TERMINATED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.mark_terminated();
                return true;
            }
        }
        // Wake the loop in case it is blocked waiting for work.
        let _ = self.inner.tx.try_send(Envelope::Wake);
        true
    }

    /// Whether shutdown has been requested (or completed).
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN
    }

    /// Whether the loop no longer admits tasks.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= SHUTDOWN
    }

    /// Whether the loop thread has fully stopped.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= TERMINATED
    }

    /// Block until the loop terminates or the timeout elapses. Returns
    /// whether termination was reached.
    pub fn await_terminated(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut done = self.inner.terminated.lock();
        while !*done {
            if self
                .inner
                .terminated_cond
                .wait_until(&mut done, deadline)
                .timed_out()
            {
                return *done;
            }
        }
        true
    }

    fn mark_terminated(&self) {
        *self.inner.terminated.lock() = true;
        self.inner.terminated_cond.notify_all();
    }
}

// ── Loop thread body ────────────────────────────────────────────────

fn run_loop(inner: Arc<LoopInner>, rx: Receiver<Envelope>) {
    CURRENT_LOOP.set(inner.id);
    crate::counter::set_loop_shard(inner.index);
    if let Some(core) = inner.pin_core {
        // Best-effort; an unpinnable core is not fatal to the loop.
        let _ = pin_to_core(core);
    }
    metrics::LOOPS_STARTED.increment();
    metrics::LOOPS_ACTIVE.increment();

    let mut last_activity = Instant::now();
    loop {
        let mut ran = run_due_scheduled(&inner);
        ran += drain_ready(&rx);
        if ran > 0 {
            last_activity = Instant::now();
        }

        if inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
            if confirm_shutdown(&inner, &rx, last_activity) {
                break;
            }
            // Quiet period still running; stay responsive to stragglers.
            if let Ok(Envelope::Task(task)) = rx.recv_timeout(Duration::from_millis(1)) {
                run_task(task);
                last_activity = Instant::now();
            }
            continue;
        }

        // Block until new work arrives or the next deadline is due.
        let next_deadline = inner.sched.lock().peek().map(|t| t.deadline());
        let received = match next_deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv_timeout(IDLE_TICK),
        };
        if let Ok(Envelope::Task(task)) = received {
            run_task(task);
            last_activity = Instant::now();
        }
    }

    metrics::LOOPS_TERMINATED.increment();
    metrics::LOOPS_ACTIVE.decrement();
    let handle = EventLoop { inner };
    handle.mark_terminated();
}

/// Execute one plain task, containing any panic at the loop boundary.
fn run_task(task: Runnable) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        metrics::TASK_PANICS.increment();
    }
    metrics::TASKS_EXECUTED.increment();
}

/// Pop and run every scheduled task whose deadline has elapsed.
fn run_due_scheduled(inner: &Arc<LoopInner>) -> usize {
    let mut fired = 0;
    loop {
        let now = Instant::now();
        let due = {
            let mut sched = inner.sched.lock();
            match sched.peek() {
                Some(t) if t.is_due(now) => sched.poll(),
                _ => None,
            }
        };
        match due {
            Some(task) => {
                task.run();
                metrics::SCHEDULED_FIRED.increment();
                fired += 1;
            }
            None => return fired,
        }
    }
}

/// Run every task currently sitting in the queue without blocking.
/// Wakeup nudges are discarded and not counted as work.
fn drain_ready(rx: &Receiver<Envelope>) -> usize {
    let mut ran = 0;
    while let Ok(envelope) = rx.try_recv() {
        if let Envelope::Task(task) = envelope {
            run_task(task);
            ran += 1;
        }
    }
    ran
}

/// Drive the `ShuttingDown -> Shutdown -> Terminated` transitions once
/// the quiet period or hard timeout allows it. Returns whether the loop
/// is finished.
fn confirm_shutdown(inner: &Arc<LoopInner>, rx: &Receiver<Envelope>, last_activity: Instant) -> bool {
    let times = match *inner.shutdown.lock() {
        Some(t) => t,
        // Shutdown flagged but parameters not yet visible; try again.
        None => return false,
    };
    let now = Instant::now();
    let quiet_elapsed = now.duration_since(last_activity) >= times.quiet_period;
    let timed_out = now.duration_since(times.start) >= times.timeout;
    if !quiet_elapsed && !timed_out {
        return false;
    }

    // Drain and execute everything admitted so far.
    loop {
        let ran = run_due_scheduled(inner) + drain_ready(rx);
        if ran == 0 {
            break;
        }
    }
    let _ = inner
        .state
        .compare_exchange(SHUTTING_DOWN, SHUTDOWN, Ordering::AcqRel, Ordering::Acquire);

    // One final pass for tasks that raced the transition; new submissions
    // are rejected from here on.
    loop {
        let ran = run_due_scheduled(inner) + drain_ready(rx);
        if ran == 0 {
            break;
        }
    }

    // Anything still queued is an anomaly to report, not a crash.
    let mut dropped: u64 = 0;
    while let Ok(envelope) = rx.try_recv() {
        if matches!(envelope, Envelope::Task(_)) {
            dropped += 1;
        }
    }
    for task in inner.sched.lock().drain() {
        task.promise().try_failure(Error::Rejected);
        dropped += 1;
    }
    if dropped > 0 {
        metrics::TASKS_DROPPED.add(dropped);
    }

    let _ = inner
        .state
        .compare_exchange(SHUTDOWN, TERMINATED, Ordering::AcqRel, Ordering::Acquire);
    true
}

/// Pin the current thread to a specific CPU core.
fn pin_to_core(core: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Number of available CPU cores.
pub(crate) fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 { 1 } else { ret as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;

    fn test_loop() -> EventLoop {
        let config = crate::ConfigBuilder::new()
            .task_queue_capacity(1024)
            .shutdown_quiet_period(Duration::from_millis(10))
            .shutdown_timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        EventLoop::new(&config, 0).unwrap()
    }

    #[test]
    fn starts_lazily_and_executes() {
        let lp = test_loop();
        assert_eq!(lp.state(), LoopState::NotStarted);

        let (tx, rx) = mpsc::channel();
        lp.execute(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
        assert_eq!(lp.state(), LoopState::Started);

        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn in_event_loop_from_inside_and_outside() {
        let lp = test_loop();
        assert!(!lp.in_event_loop());

        let probe = lp.clone();
        let (tx, rx) = mpsc::channel();
        lp.execute(move || tx.send(probe.in_event_loop()).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let lp = test_loop();
        let (tx, rx) = mpsc::channel();
        for i in 0..32 {
            let tx = tx.clone();
            lp.execute(move || tx.send(i).unwrap()).unwrap();
        }
        for expected in 0..32 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), expected);
        }
        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn panicking_task_does_not_kill_the_loop() {
        let lp = test_loop();
        lp.execute(|| panic!("task blew up")).unwrap();

        let (tx, rx) = mpsc::channel();
        lp.execute(move || tx.send("still alive").unwrap()).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "still alive"
        );

        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn scheduled_tasks_fire_in_deadline_order() {
        let lp = test_loop();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        lp.schedule(Duration::from_millis(60), move || o.lock().push("late"))
            .unwrap();
        let o = Arc::clone(&order);
        lp.schedule(Duration::from_millis(20), move || o.lock().push("early"))
            .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec!["early", "late"]);

        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn cancelled_scheduled_task_never_fires() {
        let lp = test_loop();
        let fired = Arc::new(AtomicU32::new(0));

        let f = Arc::clone(&fired);
        let task = lp
            .schedule(Duration::from_millis(80), move || {
                f.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        task.cancel().unwrap();
        assert!(task.promise().is_cancelled());

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        // Double cancel is an illegal-state error.
        assert!(matches!(task.cancel(), Err(Error::IllegalState(_))));

        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_drains_queued_tasks_then_rejects() {
        let lp = test_loop();
        let counter = Arc::new(AtomicU32::new(0));

        // Park the loop briefly so tasks pile up behind the first one.
        let c = Arc::clone(&counter);
        lp.execute(move || {
            std::thread::sleep(Duration::from_millis(50));
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        for _ in 0..3 {
            let c = Arc::clone(&counter);
            lp.execute(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        assert!(lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(2)));
        assert!(lp.await_terminated(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::Relaxed), 4);

        // Past Shutdown, submission fails fast.
        assert!(matches!(lp.execute(|| {}), Err(Error::Rejected)));
    }

    #[test]
    fn shutdown_of_never_started_loop_terminates() {
        let lp = test_loop();
        assert_eq!(lp.state(), LoopState::NotStarted);
        assert!(lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(200)));
        // The request steps NotStarted through Started; once it returns
        // the loop is at least ShuttingDown, never still NotStarted.
        assert!(lp.state() >= LoopState::ShuttingDown);
        assert!(lp.await_terminated(Duration::from_secs(5)));
        assert!(lp.is_terminated());
        assert_eq!(lp.state(), LoopState::Terminated);
    }

    #[test]
    fn accepted_submissions_survive_shutdown_race() {
        let lp = test_loop();
        let ran = Arc::new(AtomicU32::new(0));

        // Hammer the loop from another thread while shutdown races the
        // final drain. Every submission that reported Ok must execute.
        let submitter = {
            let lp = lp.clone();
            let ran = Arc::clone(&ran);
            std::thread::spawn(move || {
                let mut accepted = 0u32;
                loop {
                    let r = Arc::clone(&ran);
                    match lp.execute(move || {
                        r.fetch_add(1, Ordering::Relaxed);
                    }) {
                        Ok(()) => accepted += 1,
                        Err(Error::QueueFull) => std::thread::yield_now(),
                        Err(_) => break,
                    }
                }
                accepted
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(lp.shutdown_gracefully(Duration::ZERO, Duration::from_secs(5)));
        assert!(lp.await_terminated(Duration::from_secs(10)));

        let accepted = submitter.join().unwrap();
        assert!(
            ran.load(Ordering::Relaxed) >= accepted,
            "a submission was accepted but never executed"
        );
    }

    #[test]
    fn idle_loop_shutdown_skips_elapsed_quiet_period() {
        let config = crate::ConfigBuilder::new()
            .task_queue_capacity(1024)
            .shutdown_quiet_period(Duration::from_millis(400))
            .shutdown_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let lp = EventLoop::new(&config, 0).unwrap();

        let (tx, rx) = mpsc::channel();
        lp.execute(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Let the quiet period elapse while the loop sits idle. The
        // shutdown wakeup must not register as activity, so termination
        // is immediate rather than one quiet period later.
        std::thread::sleep(Duration::from_millis(500));
        let requested = Instant::now();
        assert!(lp.shutdown_gracefully(Duration::from_millis(400), Duration::from_secs(5)));
        assert!(lp.await_terminated(Duration::from_secs(5)));
        assert!(requested.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn second_shutdown_request_reports_false() {
        let lp = test_loop();
        lp.execute(|| {}).unwrap();
        assert!(lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500)));
        assert!(!lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500)));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }

    #[test]
    fn submit_returns_typed_result() {
        let lp = test_loop();
        let task = lp.submit(|| 6 * 7).unwrap();
        assert_eq!(task.promise().wait_result().unwrap(), 42);
        lp.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(500));
        assert!(lp.await_terminated(Duration::from_secs(5)));
    }
}
