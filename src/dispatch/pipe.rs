//! Dispatcher for single-backend gateways.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Payload;
use crate::message::MessageType;

use super::{apply_middleware, Connection, Dispatcher, Middleware, Request, RequestHandler, RequestParser};

/// Routes every request to one backend.
///
/// No routing is involved; for single-backend gateways this is enough.
pub struct PipeDispatcher {
    backend: Arc<dyn RequestHandler>,
    middlewares: Vec<Middleware>,
    parser: Option<RequestParser>,
}

impl PipeDispatcher {
    pub fn new(backend: Arc<dyn RequestHandler>) -> Self {
        Self {
            backend,
            middlewares: Vec::new(),
            parser: None,
        }
    }

    /// Installs a request parser; without one, raw requests are built with
    /// the frame-type routing key.
    pub fn with_parser(mut self, parser: RequestParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Registers a middleware. Middleware run in registration order.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }
}

#[async_trait]
impl Dispatcher for PipeDispatcher {
    async fn dispatch(&self, conn: Arc<dyn Connection>, msg_type: MessageType, payload: Payload) {
        let ctx = conn.context().clone();

        let req = match &self.parser {
            Some(parser) => match parser(&conn, ctx, msg_type, payload) {
                Some(req) => req,
                None => return,
            },
            None => Request::new(ctx, msg_type, payload),
        };

        let handler = apply_middleware(&self.middlewares, Arc::clone(&self.backend));

        if let Err(err) = handler.handle(conn, req).await {
            tracing::error!(error = %err, "error handling request");
        }
    }
}
