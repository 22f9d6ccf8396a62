//! Runnable promises: one-shot tasks and deadline-scheduled tasks.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::promise::{Promise, far_future};
use crate::queue::{HeapEntry, NOT_IN_QUEUE};

/// A promise that carries its own unit of work.
///
/// `run()` executes the wrapped closure once and settles the promise with
/// its return value; a panic inside the closure settles the promise with
/// a [`Error::HandlerPanic`] cause instead of unwinding into the loop.
pub struct Task<V> {
    promise: Promise<V>,
    work: Arc<Mutex<Option<Box<dyn FnOnce() -> V + Send>>>>,
}

impl<V> Clone for Task<V> {
    fn clone(&self) -> Self {
        Task {
            promise: self.promise.clone(),
            work: Arc::clone(&self.work),
        }
    }
}

impl<V: Send + 'static> Task<V> {
    /// Create a task owned by the given loop, wrapping the closure.
    pub fn new(executor: &EventLoop, work: impl FnOnce() -> V + Send + 'static) -> Self {
        Task {
            promise: Promise::new(executor),
            work: Arc::new(Mutex::new(Some(Box::new(work)))),
        }
    }

    /// The task's promise.
    pub fn promise(&self) -> &Promise<V> {
        &self.promise
    }

    /// Execute the wrapped work and settle the promise.
    ///
    /// A task whose promise is already settled (cancelled, or already run)
    /// does nothing. Settling uses the try-variants: a cancel that raced
    /// the run wins, and the computed value is discarded.
    pub fn run(&self) {
        let work = self.work.lock().take();
        let Some(work) = work else { return };
        if self.promise.is_done() {
            return;
        }
        match catch_unwind(AssertUnwindSafe(work)) {
            Ok(value) => {
                self.promise.try_success(value);
            }
            Err(panic) => {
                crate::metrics::TASK_PANICS.increment();
                self.promise
                    .try_failure(Error::HandlerPanic(panic_message(&panic)));
            }
        }
    }

    /// Cancel the task before it runs.
    ///
    /// Settles the promise with a cancellation cause and notifies
    /// listeners like any other completion. Cancelling a task that is
    /// already done — including already cancelled — is an illegal-state
    /// error.
    pub fn cancel(&self) -> Result<(), Error> {
        if self.promise.is_cancelled() {
            return Err(Error::IllegalState("task is already cancelled"));
        }
        if !self.promise.try_failure(Error::Cancelled) {
            return Err(Error::IllegalState("task is already complete"));
        }
        // Drop the work eagerly; it will never run.
        self.work.lock().take();
        Ok(())
    }
}

/// Best-effort description of a panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic of unknown type".to_string()
    }
}

struct ScheduledInner {
    task: Task<()>,
    deadline: Instant,
    sequence: u64,
    heap_index: AtomicUsize,
}

/// A [`Task`] with an absolute monotonic deadline, orderable in the
/// loop's scheduled-task queue.
///
/// Ordering is deadline-ascending with the insertion sequence id breaking
/// ties, so tasks scheduled for the same instant fire in FIFO order. The
/// heap index slot makes O(log n) cancellation possible without a scan.
#[derive(Clone)]
pub struct ScheduledTask {
    inner: Arc<ScheduledInner>,
}

impl ScheduledTask {
    pub(crate) fn new(
        executor: &EventLoop,
        deadline: Instant,
        sequence: u64,
        work: impl FnOnce() + Send + 'static,
    ) -> Self {
        ScheduledTask {
            inner: Arc::new(ScheduledInner {
                task: Task::new(executor, work),
                deadline,
                sequence,
                heap_index: AtomicUsize::new(NOT_IN_QUEUE),
            }),
        }
    }

    /// The absolute deadline at which this task becomes due.
    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// The promise settled when the task runs or is cancelled.
    pub fn promise(&self) -> &Promise<()> {
        self.inner.task.promise()
    }

    /// Whether the deadline has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.inner.deadline <= now
    }

    pub(crate) fn run(&self) {
        self.inner.task.run();
    }

    /// Cancel before the deadline fires.
    ///
    /// Settles the promise with a cancellation cause and removes the task
    /// from its loop's scheduled queue. Double-cancel is an illegal-state
    /// error.
    pub fn cancel(&self) -> Result<(), Error> {
        self.inner.task.cancel()?;
        crate::metrics::SCHEDULED_CANCELLED.increment();
        self.promise().executor().purge_scheduled(self.clone());
        Ok(())
    }
}

impl HeapEntry for ScheduledTask {
    fn heap_index(&self) -> usize {
        self.inner.heap_index.load(Ordering::Relaxed)
    }

    fn set_heap_index(&self, idx: usize) {
        self.inner.heap_index.store(idx, Ordering::Relaxed);
    }

    fn precedes(&self, other: &Self) -> bool {
        (self.inner.deadline, self.inner.sequence) < (other.inner.deadline, other.inner.sequence)
    }

    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Absolute deadline for `now + delay`, clamped to "effectively never"
/// instead of wrapping when the addition overflows.
pub(crate) fn deadline_for(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| far_future(now))
}
