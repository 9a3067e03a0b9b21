//! Correlation-id backend for queue-style request/response transports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::context::Context;
use crate::dispatch::{Connection, Request, RequestHandler};
use crate::error::GatewayError;
use crate::message::MessageType;

/// Submits a request to the external transport under a correlation id.
///
/// Invoked synchronously on the handler path; a submitter that needs async
/// work clones what it needs and spawns.
pub type OnRequestCallback =
    Arc<dyn Fn(&Arc<dyn Connection>, &Request, &str) -> Result<(), GatewayError> + Send + Sync>;

struct PendingRequest {
    respond: Mutex<Option<oneshot::Sender<(MessageType, Bytes)>>>,
    ctx: Context,
}

/// Pairs outbound requests with asynchronous responses by correlation id.
///
/// `handle` allocates an id, submits through the callback and waits for
/// either the correlated response or the request context. Responses for ids
/// nobody waits on anymore are silently dropped.
pub struct QueueBackend {
    requests: DashMap<String, PendingRequest>,
    on_request: OnRequestCallback,
    next_id: AtomicU64,
}

impl QueueBackend {
    pub fn new(on_request: OnRequestCallback) -> Self {
        Self {
            requests: DashMap::new(),
            on_request,
            next_id: AtomicU64::new(1),
        }
    }

    /// Delivers a response for the given correlation id.
    ///
    /// Unknown ids are dropped: the waiter already gave up or never existed.
    pub fn on_response(&self, id: &str, msg_type: MessageType, data: Bytes) {
        let Some(pending) = self.requests.get(id) else {
            tracing::debug!(request_id = %id, "dropping response without waiter");
            return;
        };

        if pending.ctx.is_done() {
            return;
        }

        let respond = pending.respond.lock().take();
        drop(pending);
        if let Some(respond) = respond {
            // Fails only if the waiter departed between lookup and send;
            // the response is discarded either way.
            let _ = respond.send((msg_type, data));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn pending(&self) -> usize {
        self.requests.len()
    }
}

#[async_trait]
impl RequestHandler for QueueBackend {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let (respond, response) = oneshot::channel();
        self.requests.insert(
            id.clone(),
            PendingRequest {
                respond: Mutex::new(Some(respond)),
                ctx: req.context().clone(),
            },
        );

        if let Err(err) = (self.on_request)(&conn, &req, &id) {
            self.requests.remove(&id);
            return Err(err);
        }

        let outcome = tokio::select! {
            received = response => match received {
                Ok((msg_type, data)) => conn.send(msg_type, data).await,
                Err(_) => Err(req.context().error()),
            },
            _ = req.context().done() => Err(req.context().error()),
        };

        self.requests.remove(&id);

        outcome
    }
}
