//! Request construction and dispatching.
//!
//! # Data Flow
//! ```text
//! Inbound frame (type, payload)
//!     → Dispatcher builds a Request bound to the connection's context
//!     → middleware chain (first registered runs first)
//!     → RequestHandler (backend, possibly behind a load balancer)
//! ```
//!
//! # Design Decisions
//! - Handlers and dispatchers are trait objects so backends, middleware and
//!   wrappers compose freely
//! - Requests are cheap to clone; retrying middleware clones per attempt
//! - Errors reaching the dispatcher are logged, never sent to the client

pub mod pipe;
pub mod request;
pub mod router;

pub use pipe::PipeDispatcher;
pub use request::Request;
pub use router::RouterDispatcher;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::channel::Payload;
use crate::context::Context;
use crate::error::GatewayError;
use crate::message::{CloseCode, MessageType};

/// A live WebSocket peer as seen by dispatchers, middleware and backends.
///
/// Implemented by the real connection and by
/// [`ConnectionWrapper`](crate::channel::ConnectionWrapper), which lets
/// middleware observe or redirect sends without touching the socket.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable connection id.
    fn id(&self) -> &str;

    /// The connection's lifetime context; canceling it terminates every
    /// request derived from it.
    fn context(&self) -> &Context;

    /// Writes a single message. Fails with `ConnectionClosed` once the
    /// connection is terminated.
    async fn send(&self, msg_type: MessageType, data: Bytes) -> Result<(), GatewayError>;

    /// Closes the connection with the given status.
    ///
    /// With a `drain` context the call first waits for in-flight requests,
    /// giving up when the drain context or the connection context is done.
    /// Fails with `ConnectionClosed` if the connection is already closing.
    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        drain: Option<Context>,
    ) -> Result<(), GatewayError>;
}

/// Fulfills one request, typically by delegating to an external resource.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError>;
}

/// Wraps a handler with additional behavior; the returned handler is what
/// the chain actually invokes.
pub type Middleware = Box<dyn Fn(Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> + Send + Sync>;

/// Builds a [`Request`] from an inbound frame.
///
/// Returning `None` drops the frame silently; parsers use this to
/// short-circuit payloads they cannot interpret.
pub type RequestParser =
    Arc<dyn Fn(&Arc<dyn Connection>, Context, MessageType, Payload) -> Option<Request> + Send + Sync>;

/// Receives every inbound frame of a connection.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, conn: Arc<dyn Connection>, msg_type: MessageType, payload: Payload);
}

/// Adapts an async closure into a [`RequestHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Arc<dyn Connection>, Request) -> BoxFuture<'static, Result<(), GatewayError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(HandlerFn(f))
}

struct HandlerFn<F>(F);

#[async_trait]
impl<F> RequestHandler for HandlerFn<F>
where
    F: Fn(Arc<dyn Connection>, Request) -> BoxFuture<'static, Result<(), GatewayError>>
        + Send
        + Sync,
{
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        (self.0)(conn, req).await
    }
}

/// Wraps `endpoint` with the registered middleware so the first-registered
/// middleware runs first.
pub(crate) fn apply_middleware(
    middlewares: &[Middleware],
    endpoint: Arc<dyn RequestHandler>,
) -> Arc<dyn RequestHandler> {
    let mut endpoint = endpoint;

    for middleware in middlewares.iter().rev() {
        endpoint = middleware(endpoint);
    }

    endpoint
}
