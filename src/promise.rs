//! Single-assignment promises with listener notification.
//!
//! A [`Promise`] is settled exactly once, with either a success value or a
//! failure [`Cause`]. Listeners are invoked exactly once, after completion,
//! on the promise's owning event loop; completion from a foreign thread
//! defers notification onto that loop via `execute`. Blocking waiters use
//! a condvar with monotonic deadline math and never run on the loop
//! thread itself.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Cause, Error, WaitError};
use crate::event_loop::EventLoop;
use crate::metrics;

type Listener<V> = Box<dyn FnOnce(&Promise<V>) + Send>;

enum Outcome<V> {
    Success(V),
    Failure(Cause),
}

struct Shared<V> {
    outcome: Option<Outcome<V>>,
    listeners: Vec<Listener<V>>,
}

struct Inner<V> {
    shared: Mutex<Shared<V>>,
    done: Condvar,
    executor: EventLoop,
}

/// A single-assignment result container bound to an owning [`EventLoop`].
///
/// Cloning yields another handle to the same promise.
pub struct Promise<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Send + 'static> Promise<V> {
    /// Create an unsettled promise owned by the given event loop.
    pub fn new(executor: &EventLoop) -> Self {
        Promise {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    outcome: None,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
                executor: executor.clone(),
            }),
        }
    }

    /// The event loop that owns listener notification for this promise.
    pub fn executor(&self) -> &EventLoop {
        &self.inner.executor
    }

    // ── Completion ──────────────────────────────────────────────────

    /// Settle with a success value.
    ///
    /// Calling this (or [`set_failure`](Self::set_failure)) on an
    /// already-settled promise is an illegal-state error.
    pub fn set_success(&self, value: V) -> Result<(), Error> {
        if self.complete(Outcome::Success(value)) {
            Ok(())
        } else {
            Err(Error::IllegalState("promise is already complete"))
        }
    }

    /// Settle with a failure cause.
    pub fn set_failure(&self, cause: impl Into<Cause>) -> Result<(), Error> {
        if self.complete(Outcome::Failure(cause.into())) {
            Ok(())
        } else {
            Err(Error::IllegalState("promise is already complete"))
        }
    }

    /// Settle with a success value unless already settled. Returns whether
    /// this call won the completion.
    pub fn try_success(&self, value: V) -> bool {
        self.complete(Outcome::Success(value))
    }

    /// Settle with a failure cause unless already settled.
    pub fn try_failure(&self, cause: impl Into<Cause>) -> bool {
        self.complete(Outcome::Failure(cause.into()))
    }

    fn complete(&self, outcome: Outcome<V>) -> bool {
        {
            let mut shared = self.inner.shared.lock();
            if shared.outcome.is_some() {
                return false;
            }
            shared.outcome = Some(outcome);
        }
        self.inner.done.notify_all();
        self.dispatch_notification();
        true
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Whether the promise has settled.
    pub fn is_done(&self) -> bool {
        self.inner.shared.lock().outcome.is_some()
    }

    /// Whether the promise settled successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.inner.shared.lock().outcome, Some(Outcome::Success(_)))
    }

    /// Whether the promise settled with a failure cause.
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.shared.lock().outcome, Some(Outcome::Failure(_)))
    }

    /// Whether the promise settled with a cancellation cause.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.shared.lock().outcome,
            Some(Outcome::Failure(ref c)) if matches!(**c, Error::Cancelled)
        )
    }

    /// The failure cause, if settled unsuccessfully.
    pub fn cause(&self) -> Option<Cause> {
        match self.inner.shared.lock().outcome {
            Some(Outcome::Failure(ref c)) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    // ── Listeners ───────────────────────────────────────────────────

    /// Attach a listener invoked exactly once after completion, on the
    /// owning event loop.
    ///
    /// If the promise is already settled, notification is scheduled
    /// immediately. A panicking listener is contained and counted; later
    /// listeners still run.
    pub fn add_listener(&self, listener: impl FnOnce(&Promise<V>) + Send + 'static) {
        let already_done = {
            let mut shared = self.inner.shared.lock();
            shared.listeners.push(Box::new(listener));
            shared.outcome.is_some()
        };
        if already_done {
            self.dispatch_notification();
        }
    }

    /// Hop onto the owning loop (if not already there) and drain listeners.
    fn dispatch_notification(&self) {
        if self.inner.executor.in_event_loop() {
            self.notify_now();
            return;
        }
        let this = self.clone();
        if self.inner.executor.execute(move || this.notify_now()).is_err() {
            // The loop is gone; notify inline so listeners never starve.
            self.notify_now();
        }
    }

    /// Drain-and-run until no listener remains, re-checking for listeners
    /// added concurrently during dispatch.
    fn notify_now(&self) {
        loop {
            let batch = {
                let mut shared = self.inner.shared.lock();
                if shared.listeners.is_empty() {
                    return;
                }
                std::mem::take(&mut shared.listeners)
            };
            for listener in batch {
                if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                    metrics::LISTENER_PANICS.increment();
                }
            }
        }
    }

    // ── Blocking waiters ────────────────────────────────────────────

    /// Block the calling thread until the promise settles.
    ///
    /// Fails with [`WaitError::WouldDeadlock`] when called from the owning
    /// loop thread.
    pub fn await_done(&self) -> Result<(), WaitError> {
        self.check_deadlock()?;
        let mut shared = self.inner.shared.lock();
        while shared.outcome.is_none() {
            self.inner.done.wait(&mut shared);
        }
        Ok(())
    }

    /// Block until the promise settles or the timeout elapses.
    ///
    /// Returns whether the promise is settled; timing out is not an error.
    /// Remaining time is recomputed against a monotonic deadline after
    /// each wakeup.
    pub fn await_timeout(&self, timeout: Duration) -> Result<bool, WaitError> {
        self.check_deadlock()?;
        let deadline = deadline_after(timeout);
        let mut shared = self.inner.shared.lock();
        while shared.outcome.is_none() {
            if self.inner.done.wait_until(&mut shared, deadline).timed_out() {
                return Ok(shared.outcome.is_some());
            }
        }
        Ok(true)
    }

    /// Block until settled, then return the value or the failure.
    ///
    /// Cancellation is reported as [`WaitError::Cancelled`], distinct from
    /// ordinary failure.
    pub fn wait_result(&self) -> Result<V, WaitError>
    where
        V: Clone,
    {
        self.await_done()?;
        self.settled_result()
    }

    /// Like [`wait_result`](Self::wait_result), but gives up after the
    /// timeout with [`WaitError::Timeout`].
    pub fn wait_result_timeout(&self, timeout: Duration) -> Result<V, WaitError>
    where
        V: Clone,
    {
        if !self.await_timeout(timeout)? {
            return Err(WaitError::Timeout);
        }
        self.settled_result()
    }

    fn settled_result(&self) -> Result<V, WaitError>
    where
        V: Clone,
    {
        match self.inner.shared.lock().outcome {
            Some(Outcome::Success(ref v)) => Ok(v.clone()),
            Some(Outcome::Failure(ref c)) if matches!(**c, Error::Cancelled) => {
                Err(WaitError::Cancelled)
            }
            Some(Outcome::Failure(ref c)) => Err(WaitError::Failed(Arc::clone(c))),
            None => unreachable!("settled_result called before completion"),
        }
    }

    fn check_deadlock(&self) -> Result<(), WaitError> {
        if self.inner.executor.in_event_loop() {
            return Err(WaitError::WouldDeadlock);
        }
        Ok(())
    }
}

/// Monotonic deadline for a timeout, clamped instead of overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| far_future(now))
}

/// Effectively-never deadline used when `now + delay` overflows.
pub(crate) fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86400 * 365 * 30)
}
