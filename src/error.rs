use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors returned by the eventline runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Thread spawn or other OS-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A state transition that the lifecycle forbids (double completion,
    /// double cancel, re-registration). Always a programming error.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// Work submitted to an event loop that has reached `Shutdown`.
    #[error("event loop rejected the task: already shut down")]
    Rejected,
    /// The loop's bounded task queue is full.
    #[error("event loop task queue is full")]
    QueueFull,
    /// The task was cancelled before it ran.
    #[error("task was cancelled")]
    Cancelled,
    /// A channel may be registered with an event loop exactly once.
    #[error("channel is already registered with an event loop")]
    AlreadyRegistered,
    /// The operation requires the channel to be registered first.
    #[error("channel is not registered with an event loop")]
    NotRegistered,
    /// A handler with this name is already in the pipeline.
    #[error("duplicate handler name: {0}")]
    DuplicateHandler(String),
    /// The handler is not in this pipeline.
    #[error("handler not found in pipeline")]
    HandlerNotFound,
    /// A handler or user task panicked; the panic was contained at the
    /// loop boundary and converted into this cause.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),
}

/// Failure cause stored in a completed promise.
///
/// Shared because every listener and every blocked waiter observes the
/// same cause.
pub type Cause = Arc<Error>;

/// Errors returned by blocking waiters ([`Promise::wait_result`] and
/// friends).
///
/// Timeout is deliberately distinct from the promise's own result: a
/// timed-out wait leaves the promise untouched and still pending.
///
/// [`Promise::wait_result`]: crate::Promise::wait_result
#[derive(Debug, Error)]
pub enum WaitError {
    /// The promise settled with a failure cause.
    #[error("operation failed: {0}")]
    Failed(Cause),
    /// The promise settled with a cancellation cause.
    #[error("operation was cancelled")]
    Cancelled,
    /// The wait deadline elapsed before the promise settled.
    #[error("timed out before completion")]
    Timeout,
    /// The wait was issued from the promise's own event loop thread,
    /// which would deadlock the loop.
    #[error("blocking wait from inside the owning event loop")]
    WouldDeadlock,
}
