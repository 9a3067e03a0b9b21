//! Dispatcher that selects a backend by routing key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Payload;
use crate::error::GatewayError;
use crate::message::MessageType;

use super::{apply_middleware, Connection, Dispatcher, Middleware, Request, RequestHandler, RequestParser};

/// Routes requests to backends by the request's routing key, falling back
/// to a default backend for unknown keys.
pub struct RouterDispatcher {
    default_backend: Arc<dyn RequestHandler>,
    backends: HashMap<String, Arc<dyn RequestHandler>>,
    parser: RequestParser,
    middlewares: Vec<Middleware>,
}

impl RouterDispatcher {
    /// Creates a router around a default backend and a request parser.
    ///
    /// The parser derives the routing key from the payload; returning `None`
    /// drops the frame.
    pub fn new(default_backend: Arc<dyn RequestHandler>, parser: RequestParser) -> Self {
        Self {
            default_backend,
            backends: HashMap::new(),
            parser,
            middlewares: Vec::new(),
        }
    }

    /// Registers a backend for the given routing keys.
    ///
    /// Fails without registering anything if one of the keys is taken.
    pub fn add_backend(
        &mut self,
        backend: Arc<dyn RequestHandler>,
        routing_keys: &[&str],
    ) -> Result<(), GatewayError> {
        for key in routing_keys {
            if self.backends.contains_key(*key) {
                return Err(GatewayError::DuplicateRoutingKey((*key).to_owned()));
            }
        }

        for key in routing_keys {
            self.backends
                .insert((*key).to_owned(), Arc::clone(&backend));
        }

        Ok(())
    }

    /// Registers a middleware. Middleware run in registration order.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }
}

#[async_trait]
impl Dispatcher for RouterDispatcher {
    async fn dispatch(&self, conn: Arc<dyn Connection>, msg_type: MessageType, payload: Payload) {
        let ctx = conn.context().clone();

        let Some(req) = (self.parser)(&conn, ctx, msg_type, payload) else {
            return;
        };

        let backend = self
            .backends
            .get(req.routing_key())
            .unwrap_or(&self.default_backend);

        let handler = apply_middleware(&self.middlewares, Arc::clone(backend));
        let routing_key = req.routing_key().to_owned();

        if let Err(err) = handler.handle(conn, req).await {
            tracing::error!(error = %err, routing_key = %routing_key, "error handling request");
        }
    }
}
