//! Request handlers that fulfill requests against external resources.
//!
//! # Design Decisions
//! - Every backend is a [`RequestHandler`](crate::dispatch::RequestHandler),
//!   so middleware and the load balancer compose over all of them
//! - Backends write responses straight to the originating connection; a
//!   `ConnectionClosed` on that final send means the client hung up and is
//!   not escalated

mod http;
mod load_balancer;
mod queue;
mod ws;

pub use http::{HttpBackend, RequestFactory};
pub use load_balancer::{LoadBalancer, DEFAULT_ERROR_THRESHOLD};
pub use queue::{OnRequestCallback, QueueBackend};
pub use ws::{Dialer, WsBackend, WsRequestFactory};
