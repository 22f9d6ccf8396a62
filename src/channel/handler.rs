use std::net::SocketAddr;
use std::ops::BitOr;

use crate::channel::context::Context;
use crate::error::Cause;
use crate::promise::Promise;

/// Which event directions a handler participates in.
///
/// Propagation skips contexts whose flags don't match the travelling
/// event: inbound events only visit `INBOUND` handlers, outbound
/// operations only visit `OUTBOUND` handlers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HandlerFlags(u8);

impl HandlerFlags {
    /// Receives inbound lifecycle events (registered, active, exception).
    pub const INBOUND: HandlerFlags = HandlerFlags(0b01);
    /// Receives outbound operations (bind, connect).
    pub const OUTBOUND: HandlerFlags = HandlerFlags(0b10);

    /// Whether all of `other`'s directions are set.
    pub fn contains(self, other: HandlerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HandlerFlags {
    type Output = HandlerFlags;

    fn bitor(self, rhs: HandlerFlags) -> HandlerFlags {
        HandlerFlags(self.0 | rhs.0)
    }
}

/// A node's behavior in a channel pipeline.
///
/// Every method has a default that forwards the event to the next
/// matching handler, so implementations only override what they care
/// about. Overrides that still want propagation must call the matching
/// `fire_*` / outbound method on the context themselves.
///
/// Handlers are invoked on their context's event loop; a handler that
/// panics inside an inbound method has the panic converted to a cause
/// and redirected to the next exception handler, and a panic inside an
/// outbound method fails the operation's promise.
pub trait ChannelHandler: Send + Sync + 'static {
    /// Event directions this handler participates in.
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::INBOUND | HandlerFlags::OUTBOUND
    }

    /// Called once after the handler's context joins a pipeline (deferred
    /// until registration when added to an unregistered channel).
    fn handler_added(&self, _ctx: &Context) {}

    /// Called once after the handler's context leaves the pipeline.
    fn handler_removed(&self, _ctx: &Context) {}

    // ── Inbound ─────────────────────────────────────────────────────

    /// The channel was registered with its event loop.
    fn channel_registered(&self, ctx: &Context) {
        ctx.fire_channel_registered();
    }

    /// The channel became active (bound or connected).
    fn channel_active(&self, ctx: &Context) {
        ctx.fire_channel_active();
    }

    /// An exception travelling inbound reached this handler.
    fn exception_caught(&self, ctx: &Context, cause: Cause) {
        ctx.fire_exception_caught(cause);
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Bind request travelling toward the transport.
    fn bind(&self, ctx: &Context, addr: SocketAddr, promise: Promise<()>) {
        ctx.bind(addr, promise);
    }

    /// Connect request travelling toward the transport.
    fn connect(
        &self,
        ctx: &Context,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: Promise<()>,
    ) {
        ctx.connect(remote, local, promise);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_contains() {
        let both = HandlerFlags::INBOUND | HandlerFlags::OUTBOUND;
        assert!(both.contains(HandlerFlags::INBOUND));
        assert!(both.contains(HandlerFlags::OUTBOUND));
        assert!(!HandlerFlags::INBOUND.contains(HandlerFlags::OUTBOUND));
    }
}
