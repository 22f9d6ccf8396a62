//! eventline runtime metrics.
//!
//! Per-loop counters for task throughput, scheduling, shutdown anomalies,
//! and pipeline activity. Sharded per loop thread so the hot paths never
//! contend; exposed through metriken registration.

use crate::counter::{Counter, CounterGroup};
use metriken::{Gauge, metric};

// Counter groups (sharded storage — one shard per loop, no false sharing).
static TASKS: CounterGroup = CounterGroup::new();
static SCHED: CounterGroup = CounterGroup::new();
static LOOPS: CounterGroup = CounterGroup::new();
static CHANNEL: CounterGroup = CounterGroup::new();

/// Counter slot indices for task metrics.
pub mod tasks {
    pub const EXECUTED: usize = 0;
    pub const REJECTED: usize = 1;
    pub const DROPPED: usize = 2;
    pub const PANICS: usize = 3;
}

/// Counter slot indices for scheduled-task metrics.
pub mod sched {
    pub const FIRED: usize = 0;
    pub const CANCELLED: usize = 1;
}

/// Counter slot indices for loop lifecycle metrics.
pub mod loops {
    pub const STARTED: usize = 0;
    pub const TERMINATED: usize = 1;
}

/// Counter slot indices for channel/pipeline metrics.
pub mod channel {
    pub const REGISTERED: usize = 0;
    pub const HANDLER_PANICS: usize = 1;
    pub const UNHANDLED_EXCEPTIONS: usize = 2;
    pub const LISTENER_PANICS: usize = 3;
}

// ── Tasks ────────────────────────────────────────────────────────

#[metric(name = "eventline/tasks/executed", description = "Tasks executed")]
pub static TASKS_EXECUTED: Counter = Counter::new(&TASKS, tasks::EXECUTED);

#[metric(
    name = "eventline/tasks/rejected",
    description = "Tasks rejected after shutdown or on a full queue"
)]
pub static TASKS_REJECTED: Counter = Counter::new(&TASKS, tasks::REJECTED);

#[metric(
    name = "eventline/tasks/dropped",
    description = "Tasks left unexecuted when a loop terminated"
)]
pub static TASKS_DROPPED: Counter = Counter::new(&TASKS, tasks::DROPPED);

#[metric(
    name = "eventline/tasks/panics",
    description = "User tasks that panicked; contained at the loop boundary"
)]
pub static TASK_PANICS: Counter = Counter::new(&TASKS, tasks::PANICS);

// ── Scheduled tasks ──────────────────────────────────────────────

#[metric(
    name = "eventline/scheduled/fired",
    description = "Scheduled tasks fired at their deadline"
)]
pub static SCHEDULED_FIRED: Counter = Counter::new(&SCHED, sched::FIRED);

#[metric(
    name = "eventline/scheduled/cancelled",
    description = "Scheduled tasks cancelled before firing"
)]
pub static SCHEDULED_CANCELLED: Counter = Counter::new(&SCHED, sched::CANCELLED);

// ── Loop lifecycle ───────────────────────────────────────────────

#[metric(name = "eventline/loops/started", description = "Loop threads started")]
pub static LOOPS_STARTED: Counter = Counter::new(&LOOPS, loops::STARTED);

#[metric(
    name = "eventline/loops/terminated",
    description = "Loop threads terminated"
)]
pub static LOOPS_TERMINATED: Counter = Counter::new(&LOOPS, loops::TERMINATED);

#[metric(name = "eventline/loops/active", description = "Currently running loops")]
pub static LOOPS_ACTIVE: Gauge = Gauge::new();

// ── Channels & pipeline ──────────────────────────────────────────

#[metric(
    name = "eventline/channels/registered",
    description = "Channels registered with an event loop"
)]
pub static CHANNELS_REGISTERED: Counter = Counter::new(&CHANNEL, channel::REGISTERED);

#[metric(
    name = "eventline/pipeline/handler_panics",
    description = "Pipeline handler panics converted into exception events"
)]
pub static HANDLER_PANICS: Counter = Counter::new(&CHANNEL, channel::HANDLER_PANICS);

#[metric(
    name = "eventline/pipeline/unhandled_exceptions",
    description = "Exception events that reached the tail of a pipeline"
)]
pub static UNHANDLED_EXCEPTIONS: Counter = Counter::new(&CHANNEL, channel::UNHANDLED_EXCEPTIONS);

#[metric(
    name = "eventline/promise/listener_panics",
    description = "Promise listeners that panicked during notification"
)]
pub static LISTENER_PANICS: Counter = Counter::new(&CHANNEL, channel::LISTENER_PANICS);
