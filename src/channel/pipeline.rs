use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::channel::context::{ADD_COMPLETE, ADD_PENDING, Context, NIL, Node, REMOVED};
use crate::channel::handler::{ChannelHandler, HandlerFlags};
use crate::channel::{Channel, ChannelCore};
use crate::error::{Cause, Error};
use crate::event_loop::EventLoop;
use crate::metrics::{HANDLER_PANICS, UNHANDLED_EXCEPTIONS};
use crate::promise::Promise;
use crate::task::panic_message;

const HEAD: usize = 0;
const TAIL: usize = 1;

/// Inbound lifecycle events, travelling head to tail.
pub(crate) enum InboundEvent {
    Registered,
    Active,
    ExceptionCaught(Cause),
}

/// Outbound operations, travelling tail to head.
pub(crate) enum OutboundOp {
    Bind(SocketAddr),
    Connect(SocketAddr, Option<SocketAddr>),
}

struct Arena {
    slots: Vec<Option<Arc<Node>>>,
    free: Vec<usize>,
}

struct Shared {
    channel: Weak<ChannelCore>,
    arena: RwLock<Arena>,
    /// Serializes structural changes. Traversal only needs the arena
    /// read lock.
    mutation: Mutex<()>,
    /// `Some` until the channel registers: handler_added callbacks for
    /// these contexts are replayed, in insertion order, at registration.
    pending_added: Mutex<Option<Vec<Arc<Node>>>>,
    next_name: AtomicUsize,
}

/// An ordered chain of handlers attached to one channel.
///
/// The chain is bracketed by two internal sentinels: the head forwards
/// outbound operations to the transport, the tail swallows inbound
/// events that reached the end (counting unhandled exceptions). User
/// handlers sit between them in insertion order.
#[derive(Clone)]
pub struct ChannelPipeline {
    shared: Arc<Shared>,
}

impl ChannelPipeline {
    pub(crate) fn new(channel: Weak<ChannelCore>) -> ChannelPipeline {
        let head = Arc::new(Node {
            slot: HEAD,
            name: "head".to_string(),
            prev: AtomicUsize::new(NIL),
            next: AtomicUsize::new(TAIL),
            state: AtomicU8::new(ADD_COMPLETE),
            flags: HandlerFlags::OUTBOUND,
            handler: Arc::new(HeadHandler),
            executor: None,
        });
        let tail = Arc::new(Node {
            slot: TAIL,
            name: "tail".to_string(),
            prev: AtomicUsize::new(HEAD),
            next: AtomicUsize::new(NIL),
            state: AtomicU8::new(ADD_COMPLETE),
            flags: HandlerFlags::INBOUND,
            handler: Arc::new(TailHandler),
            executor: None,
        });
        ChannelPipeline {
            shared: Arc::new(Shared {
                channel,
                arena: RwLock::new(Arena {
                    slots: vec![Some(head), Some(tail)],
                    free: Vec::new(),
                }),
                mutation: Mutex::new(()),
                pending_added: Mutex::new(Some(Vec::new())),
                next_name: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn channel(&self) -> Option<Channel> {
        self.shared.channel.upgrade().map(|core| Channel { core })
    }

    // ── Modification ────────────────────────────────────────────────

    /// Appends a handler before the tail with a generated name.
    pub fn add_last(&self, handler: Arc<dyn ChannelHandler>) -> Result<(), Error> {
        self.add_last_inner(None, None, handler)
    }

    /// Appends a handler with an explicit name. Names are unique within
    /// a pipeline.
    pub fn add_last_named(
        &self,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), Error> {
        self.add_last_inner(Some(name.to_string()), None, handler)
    }

    /// Appends a handler whose callbacks run on `executor` instead of
    /// the channel's event loop.
    pub fn add_last_on(
        &self,
        executor: &EventLoop,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), Error> {
        self.add_last_inner(None, Some(executor.clone()), handler)
    }

    fn add_last_inner(
        &self,
        name: Option<String>,
        executor: Option<EventLoop>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), Error> {
        let guard = self.shared.mutation.lock();
        let name = match name {
            Some(name) => {
                if self.find_by_name(&name).is_some() {
                    return Err(Error::DuplicateHandler(name));
                }
                name
            }
            None => self.generate_name(),
        };
        let flags = handler.flags();
        let node = {
            let mut arena = self.shared.arena.write();
            let slot = match arena.free.pop() {
                Some(slot) => slot,
                None => {
                    arena.slots.push(None);
                    arena.slots.len() - 1
                }
            };
            let tail = match arena.slots[TAIL].clone() {
                Some(tail) => tail,
                None => return Err(Error::IllegalState("pipeline torn down")),
            };
            let prev_slot = tail.prev.load(Ordering::Acquire);
            let node = Arc::new(Node {
                slot,
                name,
                prev: AtomicUsize::new(prev_slot),
                next: AtomicUsize::new(TAIL),
                state: AtomicU8::new(ADD_PENDING),
                flags,
                handler,
                executor,
            });
            arena.slots[slot] = Some(node.clone());
            if let Some(prev) = arena.slots[prev_slot].clone() {
                prev.next.store(slot, Ordering::Release);
            }
            tail.prev.store(slot, Ordering::Release);
            node
        };
        {
            let mut pending = self.shared.pending_added.lock();
            if let Some(list) = pending.as_mut() {
                // not registered yet, replay at registration
                list.push(node);
                return Ok(());
            }
        }
        drop(guard);
        self.invoke_handler_added(node);
        Ok(())
    }

    /// Removes a handler, matched by identity. The removed callback only
    /// fires if the added callback already ran.
    pub fn remove(&self, handler: &Arc<dyn ChannelHandler>) -> Result<(), Error> {
        let node = self.find_by_handler(handler).ok_or(Error::HandlerNotFound)?;
        self.remove_node(node)
    }

    /// Removes the handler with the given name.
    pub fn remove_named(&self, name: &str) -> Result<(), Error> {
        let node = self.find_by_name(name).ok_or(Error::HandlerNotFound)?;
        self.remove_node(node)
    }

    fn remove_node(&self, node: Arc<Node>) -> Result<(), Error> {
        let guard = self.shared.mutation.lock();
        if node.state.load(Ordering::Acquire) == REMOVED {
            return Err(Error::HandlerNotFound);
        }
        {
            let mut arena = self.shared.arena.write();
            let prev_slot = node.prev.load(Ordering::Acquire);
            let next_slot = node.next.load(Ordering::Acquire);
            if let Some(prev) = arena.slots[prev_slot].clone() {
                prev.next.store(next_slot, Ordering::Release);
            }
            if let Some(next) = arena.slots[next_slot].clone() {
                next.prev.store(prev_slot, Ordering::Release);
            }
            arena.slots[node.slot] = None;
            arena.free.push(node.slot);
        }
        let was_complete = node.state.swap(REMOVED, Ordering::AcqRel) == ADD_COMPLETE;
        if let Some(list) = self.shared.pending_added.lock().as_mut() {
            list.retain(|pending| !Arc::ptr_eq(pending, &node));
        }
        drop(guard);
        if was_complete {
            let ctx = Context {
                pipeline: self.clone(),
                node,
            };
            let executor = self.executor_for(&ctx.node);
            run_on(executor, move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    ctx.node.handler.handler_removed(&ctx);
                }));
                if outcome.is_err() {
                    HANDLER_PANICS.increment();
                }
            });
        }
        Ok(())
    }

    // ── Lookup ──────────────────────────────────────────────────────

    /// Context for a handler, matched by identity.
    pub fn context(&self, handler: &Arc<dyn ChannelHandler>) -> Option<Context> {
        self.find_by_handler(handler).map(|node| Context {
            pipeline: self.clone(),
            node,
        })
    }

    pub fn context_by_name(&self, name: &str) -> Option<Context> {
        self.find_by_name(name).map(|node| Context {
            pipeline: self.clone(),
            node,
        })
    }

    /// Handler names in pipeline order, sentinels excluded.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut node = self.node_at(HEAD);
        while let Some(current) = node {
            if current.slot != HEAD && current.slot != TAIL {
                names.push(current.name.clone());
            }
            node = self.node_at(current.next.load(Ordering::Acquire));
        }
        names
    }

    fn find_by_handler(&self, handler: &Arc<dyn ChannelHandler>) -> Option<Arc<Node>> {
        let target = Arc::as_ptr(handler) as *const ();
        self.find(|node| {
            node.slot != HEAD
                && node.slot != TAIL
                && std::ptr::eq(Arc::as_ptr(&node.handler) as *const (), target)
        })
    }

    fn find_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.find(|node| node.slot != HEAD && node.slot != TAIL && node.name == name)
    }

    fn find(&self, matches: impl Fn(&Arc<Node>) -> bool) -> Option<Arc<Node>> {
        let mut node = self.node_at(HEAD);
        while let Some(current) = node {
            if matches(&current) {
                return Some(current);
            }
            node = self.node_at(current.next.load(Ordering::Acquire));
        }
        None
    }

    fn node_at(&self, slot: usize) -> Option<Arc<Node>> {
        if slot == NIL {
            return None;
        }
        self.shared.arena.read().slots.get(slot).cloned().flatten()
    }

    fn generate_name(&self) -> String {
        loop {
            let n = self.shared.next_name.fetch_add(1, Ordering::Relaxed);
            let name = format!("handler-{n}");
            if self.find_by_name(&name).is_none() {
                return name;
            }
        }
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Starts a registered event at the first inbound handler.
    pub fn fire_channel_registered(&self) {
        self.fire_from_head(InboundEvent::Registered);
    }

    /// Starts an active event at the first inbound handler.
    pub fn fire_channel_active(&self) {
        self.fire_from_head(InboundEvent::Active);
    }

    /// Starts an exception at the first inbound handler.
    pub fn fire_exception_caught(&self, cause: Cause) {
        self.fire_from_head(InboundEvent::ExceptionCaught(cause));
    }

    /// Starts a bind at the last outbound handler.
    pub fn bind(&self, addr: SocketAddr, promise: Promise<()>) {
        self.fire_from_tail(OutboundOp::Bind(addr), promise);
    }

    /// Starts a connect at the last outbound handler.
    pub fn connect(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: Promise<()>,
    ) {
        self.fire_from_tail(OutboundOp::Connect(remote, local), promise);
    }

    fn fire_from_head(&self, event: InboundEvent) {
        if let Some(head) = self.node_at(HEAD) {
            self.forward_inbound(&head, event);
        }
    }

    fn fire_from_tail(&self, op: OutboundOp, promise: Promise<()>) {
        match self.node_at(TAIL) {
            Some(tail) => self.forward_outbound(&tail, op, promise),
            None => {
                let _ = promise.try_failure(Error::IllegalState("pipeline torn down"));
            }
        }
    }

    /// Runs the deferred handler_added callbacks, in insertion order.
    /// After this, added callbacks fire immediately on add.
    pub(crate) fn invoke_pending_added(&self) {
        let list = self.shared.pending_added.lock().take().unwrap_or_default();
        for node in list {
            if node.state.load(Ordering::Acquire) != REMOVED {
                self.invoke_handler_added(node);
            }
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    pub(crate) fn executor_for(&self, node: &Arc<Node>) -> Option<EventLoop> {
        node.executor
            .clone()
            .or_else(|| self.channel().and_then(|ch| ch.channel_event_loop()))
    }

    fn invoke_handler_added(&self, node: Arc<Node>) {
        let ctx = Context {
            pipeline: self.clone(),
            node,
        };
        let executor = self.executor_for(&ctx.node);
        run_on(executor, move || {
            // claim the callback exactly once, losing to a racing remove
            let claimed = ctx
                .node
                .state
                .compare_exchange(ADD_PENDING, ADD_COMPLETE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if !claimed {
                return;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                ctx.node.handler.handler_added(&ctx);
            }));
            if let Err(panic) = outcome {
                HANDLER_PANICS.increment();
                let cause: Cause = Arc::new(Error::HandlerPanic(panic_message(&panic)));
                ctx.fire_exception_caught(cause);
            }
        });
    }

    pub(crate) fn forward_inbound(&self, from: &Arc<Node>, event: InboundEvent) {
        if let Some(next) = self.next_inbound(from) {
            self.invoke_inbound(next, event);
        }
    }

    fn invoke_inbound(&self, node: Arc<Node>, event: InboundEvent) {
        let ctx = Context {
            pipeline: self.clone(),
            node,
        };
        let executor = self.executor_for(&ctx.node);
        let pipeline = self.clone();
        run_on(executor, move || pipeline.invoke_inbound_now(&ctx, event));
    }

    fn invoke_inbound_now(&self, ctx: &Context, event: InboundEvent) {
        let node = Arc::clone(&ctx.node);
        if node.state.load(Ordering::Acquire) != ADD_COMPLETE {
            // added callback hasn't run (or the handler is gone), skip it
            self.forward_inbound(&node, event);
            return;
        }
        let was_exception = matches!(event, InboundEvent::ExceptionCaught(_));
        let outcome = catch_unwind(AssertUnwindSafe(|| match event {
            InboundEvent::Registered => node.handler.channel_registered(ctx),
            InboundEvent::Active => node.handler.channel_active(ctx),
            InboundEvent::ExceptionCaught(cause) => node.handler.exception_caught(ctx, cause),
        }));
        if let Err(panic) = outcome {
            HANDLER_PANICS.increment();
            if was_exception {
                // a panicking exception handler terminates propagation
                UNHANDLED_EXCEPTIONS.increment();
                return;
            }
            let cause: Cause = Arc::new(Error::HandlerPanic(panic_message(&panic)));
            self.forward_inbound(&node, InboundEvent::ExceptionCaught(cause));
        }
    }

    pub(crate) fn forward_outbound(&self, from: &Arc<Node>, op: OutboundOp, promise: Promise<()>) {
        match self.prev_outbound(from) {
            Some(prev) => self.invoke_outbound(prev, op, promise),
            None => {
                let _ = promise.try_failure(Error::IllegalState("no outbound handler"));
            }
        }
    }

    fn invoke_outbound(&self, node: Arc<Node>, op: OutboundOp, promise: Promise<()>) {
        let ctx = Context {
            pipeline: self.clone(),
            node,
        };
        let executor = self.executor_for(&ctx.node);
        let pipeline = self.clone();
        run_on(executor, move || {
            pipeline.invoke_outbound_now(&ctx, op, promise);
        });
    }

    fn invoke_outbound_now(&self, ctx: &Context, op: OutboundOp, promise: Promise<()>) {
        let node = Arc::clone(&ctx.node);
        if node.state.load(Ordering::Acquire) != ADD_COMPLETE {
            self.forward_outbound(&node, op, promise);
            return;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| match op {
            OutboundOp::Bind(addr) => node.handler.bind(ctx, addr, promise.clone()),
            OutboundOp::Connect(remote, local) => {
                node.handler.connect(ctx, remote, local, promise.clone())
            }
        }));
        if let Err(panic) = outcome {
            HANDLER_PANICS.increment();
            let _ = promise.try_failure(Error::HandlerPanic(panic_message(&panic)));
        }
    }

    fn next_inbound(&self, from: &Arc<Node>) -> Option<Arc<Node>> {
        let mut slot = from.next.load(Ordering::Acquire);
        while slot != NIL {
            let node = self.node_at(slot)?;
            if node.flags.contains(HandlerFlags::INBOUND) {
                return Some(node);
            }
            slot = node.next.load(Ordering::Acquire);
        }
        None
    }

    fn prev_outbound(&self, from: &Arc<Node>) -> Option<Arc<Node>> {
        let mut slot = from.prev.load(Ordering::Acquire);
        while slot != NIL {
            let node = self.node_at(slot)?;
            if node.flags.contains(HandlerFlags::OUTBOUND) {
                return Some(node);
            }
            slot = node.prev.load(Ordering::Acquire);
        }
        None
    }
}

/// Runs `f` on `executor`, inline when already on that loop or when the
/// channel has no loop yet. A rejected dispatch drops the callback; the
/// loop is shutting down and its remaining work is being drained.
fn run_on(executor: Option<EventLoop>, f: impl FnOnce() + Send + 'static) {
    match executor {
        Some(lp) if !lp.in_event_loop() => {
            let _ = lp.execute(f);
        }
        _ => f(),
    }
}

/// Outbound terminal: hands bind and connect to the transport.
struct HeadHandler;

impl ChannelHandler for HeadHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::OUTBOUND
    }

    fn bind(&self, ctx: &Context, addr: SocketAddr, promise: Promise<()>) {
        match ctx.channel() {
            Some(channel) => channel.transport().bind(&channel, addr, &promise),
            None => {
                let _ = promise.try_failure(Error::IllegalState("channel gone"));
            }
        }
    }

    fn connect(
        &self,
        ctx: &Context,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: Promise<()>,
    ) {
        match ctx.channel() {
            Some(channel) => channel.transport().connect(&channel, remote, local, &promise),
            None => {
                let _ = promise.try_failure(Error::IllegalState("channel gone"));
            }
        }
    }
}

/// Inbound terminal: events that reach the tail were not consumed by
/// any handler. Unhandled exceptions are counted.
struct TailHandler;

impl ChannelHandler for TailHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::INBOUND
    }

    fn channel_registered(&self, _ctx: &Context) {}

    fn channel_active(&self, _ctx: &Context) {}

    fn exception_caught(&self, _ctx: &Context, _cause: Cause) {
        UNHANDLED_EXCEPTIONS.increment();
    }
}
