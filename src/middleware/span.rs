//! Tracing span around each request.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// Wraps every request in a tracing span named `span_name`, carrying the
/// connection id and routing key as fields.
pub fn span(span_name: &'static str) -> Middleware {
    Box::new(move |next| Arc::new(Span { span_name, next }))
}

struct Span {
    span_name: &'static str,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for Span {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let span = tracing::info_span!(
            "request",
            operation = self.span_name,
            conn_id = %conn.id(),
            routing_key = %req.routing_key(),
        );

        self.next.handle(conn, req).instrument(span).await
    }
}
