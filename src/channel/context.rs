use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize};

use crate::channel::Channel;
use crate::channel::handler::{ChannelHandler, HandlerFlags};
use crate::channel::pipeline::{ChannelPipeline, InboundEvent, OutboundOp};
use crate::error::Cause;
use crate::event_loop::EventLoop;
use crate::promise::Promise;

/// Arena slot sentinel for "no neighbor".
pub(crate) const NIL: usize = usize::MAX;

// Context lifecycle. Nodes enter the pipeline at ADD_PENDING and move
// to ADD_COMPLETE when their added callback is claimed, or straight to
// REMOVED when removed before the callback ran.
pub(crate) const ADD_PENDING: u8 = 1;
pub(crate) const ADD_COMPLETE: u8 = 2;
pub(crate) const REMOVED: u8 = 3;

/// One pipeline entry. Lives in the pipeline's slot arena; `prev` and
/// `next` are arena indices so traversal needs no structural lock.
pub(crate) struct Node {
    pub(crate) slot: usize,
    pub(crate) name: String,
    pub(crate) prev: AtomicUsize,
    pub(crate) next: AtomicUsize,
    pub(crate) state: AtomicU8,
    pub(crate) flags: HandlerFlags,
    pub(crate) handler: Arc<dyn ChannelHandler>,
    /// Executor override. `None` means the channel's event loop.
    pub(crate) executor: Option<EventLoop>,
}

/// A handler's view of its position in the pipeline.
///
/// `fire_*` methods propagate an inbound event to the next matching
/// handler after this one; `bind`/`connect` propagate an outbound
/// operation to the previous matching handler. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub(crate) pipeline: ChannelPipeline,
    pub(crate) node: Arc<Node>,
}

impl Context {
    /// The handler's unique name within the pipeline.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn pipeline(&self) -> &ChannelPipeline {
        &self.pipeline
    }

    /// The channel this pipeline belongs to, if it is still alive.
    pub fn channel(&self) -> Option<Channel> {
        self.pipeline.channel()
    }

    /// The event loop this handler's callbacks run on. `None` until the
    /// channel is registered, unless the context carries an override.
    pub fn executor(&self) -> Option<EventLoop> {
        self.pipeline.executor_for(&self.node)
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.node.handler
    }

    // ── Inbound propagation ─────────────────────────────────────────

    pub fn fire_channel_registered(&self) {
        self.pipeline
            .forward_inbound(&self.node, InboundEvent::Registered);
    }

    pub fn fire_channel_active(&self) {
        self.pipeline
            .forward_inbound(&self.node, InboundEvent::Active);
    }

    pub fn fire_exception_caught(&self, cause: Cause) {
        self.pipeline
            .forward_inbound(&self.node, InboundEvent::ExceptionCaught(cause));
    }

    // ── Outbound propagation ────────────────────────────────────────

    pub fn bind(&self, addr: SocketAddr, promise: Promise<()>) {
        self.pipeline
            .forward_outbound(&self.node, OutboundOp::Bind(addr), promise);
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: Promise<()>) {
        self.pipeline
            .forward_outbound(&self.node, OutboundOp::Connect(remote, local), promise);
    }
}
