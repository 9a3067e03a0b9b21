//! Connection wrapper with pluggable send/close interceptors.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::dispatch::Connection;
use crate::error::GatewayError;
use crate::message::{CloseCode, MessageType};

/// Intercepts `send`; receives the wrapped connection so it can forward.
pub type SendInterceptor = Box<
    dyn Fn(Arc<dyn Connection>, MessageType, Bytes) -> BoxFuture<'static, Result<(), GatewayError>>
        + Send
        + Sync,
>;

/// Intercepts `close`; receives the wrapped connection so it can forward.
pub type CloseInterceptor = Box<
    dyn Fn(
            Arc<dyn Connection>,
            CloseCode,
            String,
            Option<Context>,
        ) -> BoxFuture<'static, Result<(), GatewayError>>
        + Send
        + Sync,
>;

/// Wraps a connection, redirecting `send` and/or `close` through
/// interceptors while delegating everything else.
///
/// The cache middleware uses this to capture a handler's response instead of
/// forwarding it; other middleware can use it for observation. Explicit
/// composition, no dynamic patching.
pub struct ConnectionWrapper {
    inner: Arc<dyn Connection>,
    on_send: Option<SendInterceptor>,
    on_close: Option<CloseInterceptor>,
}

impl ConnectionWrapper {
    pub fn new(inner: Arc<dyn Connection>) -> Self {
        Self {
            inner,
            on_send: None,
            on_close: None,
        }
    }

    /// Redirects `send` through `interceptor`.
    pub fn with_send_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(Arc<dyn Connection>, MessageType, Bytes) -> BoxFuture<'static, Result<(), GatewayError>>
            + Send
            + Sync
            + 'static,
    {
        self.on_send = Some(Box::new(interceptor));
        self
    }

    /// Redirects `close` through `interceptor`.
    pub fn with_close_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(
                Arc<dyn Connection>,
                CloseCode,
                String,
                Option<Context>,
            ) -> BoxFuture<'static, Result<(), GatewayError>>
            + Send
            + Sync
            + 'static,
    {
        self.on_close = Some(Box::new(interceptor));
        self
    }
}

#[async_trait]
impl Connection for ConnectionWrapper {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn context(&self) -> &Context {
        self.inner.context()
    }

    async fn send(&self, msg_type: MessageType, data: Bytes) -> Result<(), GatewayError> {
        match &self.on_send {
            Some(interceptor) => interceptor(Arc::clone(&self.inner), msg_type, data).await,
            None => self.inner.send(msg_type, data).await,
        }
    }

    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        drain: Option<Context>,
    ) -> Result<(), GatewayError> {
        match &self.on_close {
            Some(interceptor) => {
                interceptor(Arc::clone(&self.inner), code, reason.to_owned(), drain).await
            }
            None => self.inner.close(code, reason, drain).await,
        }
    }
}
