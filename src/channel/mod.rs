//! Channels and their handler pipelines.
//!
//! A [`Channel`] pairs a [`Transport`] with a [`ChannelPipeline`] and,
//! once registered, a single event loop that runs every callback for
//! the channel's handlers.

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::group::EventLoopGroup;
use crate::metrics::{CHANNELS_REGISTERED, HANDLER_PANICS};
use crate::promise::Promise;
use crate::task::panic_message;

pub mod context;
pub mod handler;
pub mod pipeline;

pub use context::Context;
pub use handler::{ChannelHandler, HandlerFlags};
pub use pipeline::ChannelPipeline;

/// The I/O half of a channel.
///
/// The runtime drives lifecycle and threading; the transport performs
/// the actual I/O. Each callback runs on the channel's event loop and
/// must settle the given promise, firing the matching inbound event on
/// success (`fire_channel_registered` after register,
/// `fire_channel_active` after bind or connect).
pub trait Transport: Send + Sync + 'static {
    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Called on the event loop once the channel is assigned to it.
    fn register(&self, channel: &Channel, promise: &Promise<()>);

    /// Bind reaching the head of the pipeline.
    fn bind(&self, channel: &Channel, addr: SocketAddr, promise: &Promise<()>);

    /// Connect reaching the head of the pipeline.
    fn connect(
        &self,
        channel: &Channel,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: &Promise<()>,
    );
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct ChannelCore {
    id: u64,
    transport: Arc<dyn Transport>,
    pipeline: ChannelPipeline,
    event_loop: OnceLock<EventLoop>,
    registered: AtomicBool,
}

/// A registerable I/O endpoint. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Channel {
    pub(crate) core: Arc<ChannelCore>,
}

impl Channel {
    pub fn new(transport: Arc<dyn Transport>) -> Channel {
        let core = Arc::new_cyclic(|weak| ChannelCore {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            pipeline: ChannelPipeline::new(weak.clone()),
            event_loop: OnceLock::new(),
            registered: AtomicBool::new(false),
        });
        Channel { core }
    }

    /// Process-unique channel id.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn pipeline(&self) -> &ChannelPipeline {
        &self.core.pipeline
    }

    /// The loop this channel is bound to, once registered.
    pub fn channel_event_loop(&self) -> Option<EventLoop> {
        self.core.event_loop.get().cloned()
    }

    pub fn is_registered(&self) -> bool {
        self.core.registered.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.transport.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.core.transport.remote_addr()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.core.transport
    }

    /// Registers the channel with a loop chosen from `group`.
    ///
    /// The assignment is permanent. Deferred handler_added callbacks
    /// replay on the loop before the transport's register runs, so
    /// handlers added before registration observe events in order.
    pub fn register(&self, group: &EventLoopGroup) -> Promise<()> {
        self.register_on(group.next().clone())
    }

    /// Registers the channel with a specific loop.
    pub fn register_on(&self, event_loop: EventLoop) -> Promise<()> {
        let promise = Promise::new(&event_loop);
        let channel = self.clone();
        let completion = promise.clone();
        let assigned = event_loop.clone();
        if event_loop
            .execute(move || channel.register0(assigned, completion))
            .is_err()
        {
            let _ = promise.try_failure(Error::Rejected);
        }
        promise
    }

    fn register0(&self, event_loop: EventLoop, promise: Promise<()>) {
        if self.core.registered.swap(true, Ordering::AcqRel) {
            let _ = promise.try_failure(Error::AlreadyRegistered);
            return;
        }
        let _ = self.core.event_loop.set(event_loop);
        CHANNELS_REGISTERED.increment();
        self.core.pipeline.invoke_pending_added();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.core.transport.register(self, &promise);
        }));
        if let Err(panic) = outcome {
            HANDLER_PANICS.increment();
            let _ = promise.try_failure(Error::HandlerPanic(panic_message(&panic)));
        }
    }

    /// Sends a bind through the pipeline, tail to head.
    pub fn bind(&self, addr: SocketAddr) -> Result<Promise<()>, Error> {
        let event_loop = self.channel_event_loop().ok_or(Error::NotRegistered)?;
        let promise = Promise::new(&event_loop);
        self.core.pipeline.bind(addr, promise.clone());
        Ok(promise)
    }

    /// Sends a connect through the pipeline, tail to head.
    pub fn connect(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> Result<Promise<()>, Error> {
        let event_loop = self.channel_event_loop().ok_or(Error::NotRegistered)?;
        let promise = Promise::new(&event_loop);
        self.core.pipeline.connect(remote, local, promise.clone());
        Ok(promise)
    }
}
