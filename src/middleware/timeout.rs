//! Per-request deadline injection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// Derives a deadline context from the request context for every request.
///
/// Backends racing against the request context then abort when the deadline
/// elapses; an earlier inherited deadline is kept.
pub fn timeout(duration: Duration) -> Middleware {
    Box::new(move |next| Arc::new(Timeout { duration, next }))
}

struct Timeout {
    duration: Duration,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for Timeout {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let deadline_ctx = req.context().with_timeout(self.duration);

        self.next.handle(conn, req.with_context(deadline_ctx)).await
    }
}
