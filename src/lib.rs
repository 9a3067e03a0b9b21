//! A programmable WebSocket-fronted API gateway core.
//!
//! Clients connect over WebSocket to a [`channel::Channel`]; each inbound
//! frame becomes a request that is parsed, walked through a middleware
//! chain, and forwarded to a backend: HTTP, an upstream WebSocket, or a
//! correlation-id queue. Backend responses come back as frames on the
//! originating connection.
//!
//! # Architecture Overview
//!
//! ```text
//!  client frame
//!      │
//!      ▼
//!  ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌────────────────┐
//!  │ channel │──▶│ registry │──▶│ connection │──▶│   dispatcher   │
//!  │ upgrade │   │admission │   │ read loop  │   │ parse + route  │
//!  └─────────┘   └──────────┘   └────────────┘   └───────┬────────┘
//!                                                        │
//!                                                        ▼
//!                                  ┌──────────────────────────────┐
//!                                  │  middleware chain            │
//!                                  │  throttle · retry · breaker  │
//!                                  │  cache · timeout · limits    │
//!                                  └──────────────┬───────────────┘
//!                                                 │
//!                      ┌──────────────┬───────────┴──┬─────────────┐
//!                      ▼              ▼              ▼             ▼
//!                 HttpBackend    WsBackend     QueueBackend  LoadBalancer
//! ```
//!
//! Connections are bounded three ways: a global connection limit at
//! admission, a per-connection concurrency semaphore in the read loop, and
//! a frame-size limit at the socket. Closing a connection cancels its
//! context and with it every in-flight request derived from it.

// Core subsystems
pub mod backend;
pub mod channel;
pub mod dispatch;
pub mod middleware;

// Cross-cutting concerns
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod server;

mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{BufferPool, Channel, Conn, ConnectionRegistry, ConnectionWrapper, Payload};
pub use config::{ChannelConfig, HttpBackendConfig, RegistryConfig, ServerConfig};
pub use context::Context;
pub use dispatch::{
    handler_fn, Connection, Dispatcher, Middleware, PipeDispatcher, Request, RequestHandler,
    RequestParser, RouterDispatcher,
};
pub use error::GatewayError;
pub use message::{CloseCode, MessageType};
pub use server::{Server, ServerHandle};
