//! Error types surfaced by the gateway core.

use std::sync::Arc;

use thiserror::Error;

/// Errors produced by connections, dispatchers, backends and middleware.
///
/// Handlers return these to the middleware chain; middleware may convert,
/// log, or swallow them. At the dispatcher boundary unhandled errors are
/// logged and never forwarded to the client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Operation attempted on a connection that is no longer connected.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Load balancer constructed with fewer than two backends.
    #[error("load balancer requires at least 2 backends")]
    NotEnoughBackends,

    /// A backend is already registered for this routing key.
    #[error("backend for routing key {0:?} already exists")]
    DuplicateRoutingKey(String),

    /// Rejected fast by an open circuit breaker.
    #[error("circuit breaker is open")]
    CircuitBreakerOpen,

    /// Denied by the rate limiter's token store.
    #[error("rate limit exceeded for {key:?}")]
    RateLimitExceeded {
        /// Key the denied request was bucketed under.
        key: String,
    },

    /// The request context was canceled.
    #[error("request canceled")]
    Canceled,

    /// The request context's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Transport failure on an upstream HTTP call.
    #[error("upstream http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure on an upstream WebSocket.
    #[error("upstream websocket failed: {0}")]
    Upstream(#[from] tokio_tungstenite::tungstenite::Error),

    /// A text frame was requested with a payload that is not valid UTF-8.
    #[error("text frame payload is not valid utf-8")]
    InvalidTextFrame,

    /// An error produced once and observed by several coalesced callers.
    #[error(transparent)]
    Shared(Arc<GatewayError>),

    /// Application-defined handler error.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl GatewayError {
    /// Wraps an application error.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        GatewayError::Other(err.into())
    }

    /// True if this error is `ConnectionClosed`, seeing through `Shared`.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            GatewayError::ConnectionClosed => true,
            GatewayError::Shared(inner) => inner.is_connection_closed(),
            _ => false,
        }
    }

    /// True for `Canceled` and `DeadlineExceeded`, seeing through `Shared`.
    pub fn is_cancellation(&self) -> bool {
        match self {
            GatewayError::Canceled | GatewayError::DeadlineExceeded => true,
            GatewayError::Shared(inner) => inner.is_cancellation(),
            _ => false,
        }
    }
}

impl From<Arc<GatewayError>> for GatewayError {
    fn from(err: Arc<GatewayError>) -> Self {
        GatewayError::Shared(err)
    }
}
