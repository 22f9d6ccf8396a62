//! Fixed pools of event loops with a registration chooser.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::Error;
use crate::event_loop::{EventLoop, num_cpus};
use crate::promise::deadline_after;
use crate::task::{ScheduledTask, Task};

/// Policy picking which loop in a group serves the next registration or
/// submission.
///
/// Implementations must be lock-free and tolerate unbounded call counts
/// (counter wraparound included).
pub trait Chooser: Send + Sync {
    /// Index of the next loop to hand out, in `0..len`.
    fn next(&self, len: usize) -> usize;
}

/// Lock-free round robin over an atomically incremented counter.
///
/// Wraparound is harmless: the counter is unsigned and the remainder
/// stays in range.
pub struct RoundRobinChooser {
    counter: AtomicUsize,
}

impl RoundRobinChooser {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinChooser {
    fn default() -> Self {
        Self::new()
    }
}

impl Chooser for RoundRobinChooser {
    fn next(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Round robin specialized for power-of-two pool sizes: masks instead of
/// dividing.
pub struct PowerOfTwoChooser {
    counter: AtomicUsize,
}

impl PowerOfTwoChooser {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for PowerOfTwoChooser {
    fn default() -> Self {
        Self::new()
    }
}

impl Chooser for PowerOfTwoChooser {
    fn next(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) & (len - 1)
    }
}

/// Pick the fitting round-robin chooser for a pool size.
fn chooser_for(len: usize) -> Box<dyn Chooser> {
    if len.is_power_of_two() {
        Box::new(PowerOfTwoChooser::new())
    } else {
        Box::new(RoundRobinChooser::new())
    }
}

/// A fixed pool of [`EventLoop`]s plus an immutable chooser.
///
/// All loops are created eagerly at construction; `next()` hands out one
/// loop per call. The group holds no task queue of its own — submission
/// methods just forward to the chosen loop.
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    chooser: Box<dyn Chooser>,
    default_quiet_period: Duration,
    default_timeout: Duration,
}

impl EventLoopGroup {
    /// Create a group from the config, with the default round-robin
    /// chooser.
    pub fn new(config: Config) -> Result<Self, Error> {
        let len = if config.loops == 0 {
            num_cpus()
        } else {
            config.loops
        };
        Self::with_chooser(config, chooser_for(len))
    }

    /// Create a group with an explicit chooser.
    ///
    /// Construction is atomic: if creating any child fails, the children
    /// already created are shut down (best effort) and the error is
    /// returned.
    pub fn with_chooser(config: Config, chooser: Box<dyn Chooser>) -> Result<Self, Error> {
        config.validate()?;
        let len = if config.loops == 0 {
            num_cpus()
        } else {
            config.loops
        };

        let mut loops = Vec::with_capacity(len);
        for index in 0..len {
            match EventLoop::new(&config, index) {
                Ok(lp) => loops.push(lp),
                Err(e) => {
                    for created in &loops {
                        created.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
                    }
                    return Err(e);
                }
            }
        }

        Ok(EventLoopGroup {
            loops,
            chooser,
            default_quiet_period: config.shutdown_quiet_period,
            default_timeout: config.shutdown_timeout,
        })
    }

    /// Number of loops in the group.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Hand out the next loop per the chooser policy.
    pub fn next(&self) -> &EventLoop {
        &self.loops[self.chooser.next(self.loops.len())]
    }

    /// Iterate over all child loops.
    pub fn iter(&self) -> impl Iterator<Item = &EventLoop> {
        self.loops.iter()
    }

    // ── Forwarding ──────────────────────────────────────────────────

    /// Enqueue a task on the next loop.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.next().execute(f)
    }

    /// Submit a closure to the next loop, returning its typed task.
    pub fn submit<V: Send + 'static>(
        &self,
        f: impl FnOnce() -> V + Send + 'static,
    ) -> Result<Task<V>, Error> {
        self.next().submit(f)
    }

    /// Schedule a closure on the next loop.
    pub fn schedule(
        &self,
        delay: Duration,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<ScheduledTask, Error> {
        self.next().schedule(delay, f)
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Request graceful shutdown of every child, using the config's
    /// default quiet period and timeout. Fire-and-forget; returns true
    /// only if every child accepted the request. Await deterministic
    /// draining with [`await_terminated`](Self::await_terminated).
    pub fn shutdown_gracefully(&self) -> bool {
        self.shutdown_gracefully_with(self.default_quiet_period, self.default_timeout)
    }

    /// Request graceful shutdown of every child with explicit timing.
    pub fn shutdown_gracefully_with(&self, quiet_period: Duration, timeout: Duration) -> bool {
        let mut all = true;
        for lp in &self.loops {
            all &= lp.shutdown_gracefully(quiet_period, timeout);
        }
        all
    }

    /// Block until every child loop terminates or the timeout elapses.
    /// Huge timeouts clamp instead of overflowing the deadline.
    pub fn await_terminated(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        for lp in &self.loops {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !lp.await_terminated(remaining) {
                return false;
            }
        }
        true
    }
}
