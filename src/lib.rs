//! eventline — multi-loop event execution runtime.
//!
//! eventline runs N single-threaded event loops with no work-stealing.
//! Work handed to a loop executes strictly in order on that loop's
//! thread: plain tasks in submission order, scheduled tasks at their
//! deadline, and channel pipeline callbacks for every channel the loop
//! owns. Completion is observed through single-assignment promises.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use eventline::{ConfigBuilder, EventLoopGroup};
//!
//! fn main() -> Result<(), eventline::Error> {
//!     let config = ConfigBuilder::new().loops(2).build()?;
//!     let group = EventLoopGroup::new(config)?;
//!
//!     let sum = group.submit(|| 2 + 2)?;
//!     assert_eq!(sum.promise().wait_result().unwrap(), 4);
//!
//!     let tick = group.schedule(Duration::from_millis(10), || {})?;
//!     tick.promise().await_done().unwrap();
//!
//!     group.shutdown_gracefully();
//!     Ok(())
//! }
//! ```
//!
//! Channels attach a handler pipeline to a [`Transport`] and pin all of
//! its callbacks to one loop; see the [`channel`] module.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod counter;
pub(crate) mod metrics;
pub(crate) mod queue;
pub(crate) mod task;

// ── Public modules ──────────────────────────────────────────────────────
pub mod channel;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod group;
pub mod promise;

// ── Re-exports: Configuration ───────────────────────────────────────────

pub use config::{Config, ConfigBuilder};

// ── Re-exports: Errors ──────────────────────────────────────────────────

/// Shared failure cause, as stored in promises.
pub use error::Cause;
pub use error::{Error, WaitError};

// ── Re-exports: Execution ───────────────────────────────────────────────

/// A single-threaded executor. See [`event_loop`].
pub use event_loop::{EventLoop, LoopState};
/// A fixed set of loops with a pluggable [`Chooser`].
pub use group::EventLoopGroup;
pub use group::{Chooser, PowerOfTwoChooser, RoundRobinChooser};

// ── Re-exports: Completion ──────────────────────────────────────────────

/// Single-assignment completion holder.
pub use promise::Promise;
/// A cancellable unit of work paired with its promise.
pub use task::{ScheduledTask, Task};

// ── Re-exports: Channels ────────────────────────────────────────────────

pub use channel::{Channel, ChannelHandler, ChannelPipeline, Context, HandlerFlags, Transport};
