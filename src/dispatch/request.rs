//! The immutable request view handed through the middleware chain.

use std::sync::Arc;

use crate::channel::Payload;
use crate::context::Context;
use crate::message::MessageType;

/// An inbound frame bound to the originating connection's lifetime.
///
/// Clones share the payload buffer and the cancellation scope, so passing a
/// request through retrying or observing middleware costs a couple of
/// reference bumps.
#[derive(Debug, Clone)]
pub struct Request {
    ctx: Context,
    msg_type: MessageType,
    payload: Payload,
    routing_key: Arc<str>,
}

impl Request {
    /// Builds a raw request; the routing key defaults to the frame type
    /// (`"text"` or `"binary"`).
    pub fn new(ctx: Context, msg_type: MessageType, payload: Payload) -> Self {
        Self {
            ctx,
            msg_type,
            payload,
            routing_key: Arc::from(msg_type.as_str()),
        }
    }

    /// Builds a request with a parser-derived routing key.
    pub fn routed(
        ctx: Context,
        msg_type: MessageType,
        payload: Payload,
        routing_key: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            ctx,
            msg_type,
            payload,
            routing_key: routing_key.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Returns a view of the same frame under a different context.
    ///
    /// Middleware uses this to inject deadlines without copying the payload.
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }
}
