//! In-memory connection double shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::context::Context;
use crate::dispatch::Connection;
use crate::error::GatewayError;
use crate::message::{CloseCode, MessageType};

/// A connection that records sends and closes instead of touching a socket.
pub(crate) struct MockConnection {
    id: String,
    ctx: Context,
    sent: Mutex<Vec<(MessageType, Bytes)>>,
    closes: Mutex<Vec<(CloseCode, String)>>,
    fail_sends: AtomicBool,
}

impl MockConnection {
    pub(crate) fn connected() -> Arc<Self> {
        Arc::new(Self {
            id: "mock-conn".to_owned(),
            ctx: Context::new(),
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Makes every subsequent `send` fail with `ConnectionClosed`.
    pub(crate) fn refuse_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<(MessageType, Bytes)> {
        self.sent.lock().clone()
    }

    pub(crate) fn closes(&self) -> Vec<(CloseCode, String)> {
        self.closes.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn send(&self, msg_type: MessageType, data: Bytes) -> Result<(), GatewayError> {
        if self.fail_sends.load(Ordering::SeqCst) || self.ctx.is_done() {
            return Err(GatewayError::ConnectionClosed);
        }

        self.sent.lock().push((msg_type, data));
        Ok(())
    }

    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        _drain: Option<Context>,
    ) -> Result<(), GatewayError> {
        if self.ctx.is_done() {
            return Err(GatewayError::ConnectionClosed);
        }

        self.closes.lock().push((code, reason.to_owned()));
        self.ctx.cancel();
        Ok(())
    }
}
