//! Connection lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request at channel path
//!     → channel.rs (503 when full, origin check, WebSocket upgrade)
//!     → registry.rs (admission, bookkeeping, hooks)
//!     → connection.rs (read loop, one callback task per frame)
//!     → dispatcher callback
//! ```
//!
//! # Design Decisions
//! - The registry owns connections; connections never point back at it
//! - Per-connection concurrency is a semaphore, not a serial queue: bounded
//!   parallelism without ordering guarantees
//! - Frame buffers are pooled and returned when the last request clone drops

mod buffer_pool;
#[allow(clippy::module_inception)]
mod channel;
mod connection;
mod registry;
mod wrapper;

pub use buffer_pool::{BufferPool, Payload};
pub use channel::Channel;
pub use connection::Conn;
pub use registry::{ConnectionHook, ConnectionRegistry};
pub use wrapper::{CloseInterceptor, ConnectionWrapper, SendInterceptor};
