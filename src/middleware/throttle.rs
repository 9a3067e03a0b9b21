//! Global concurrency throttling.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// Admits up to `limit` concurrent requests across all connections.
///
/// Callers over the limit block until a slot frees or their request context
/// is canceled.
pub fn throttler(limit: usize) -> Middleware {
    let slots = Arc::new(Semaphore::new(limit));

    Box::new(move |next| {
        Arc::new(Throttler {
            slots: Arc::clone(&slots),
            next,
        })
    })
}

struct Throttler {
    slots: Arc<Semaphore>,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for Throttler {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let permit = tokio::select! {
            permit = self.slots.acquire() => permit.expect("throttler semaphore never closes"),
            _ = req.context().done() => return Err(req.context().error()),
        };

        let result = self.next.handle(conn, req).await;

        drop(permit);

        result
    }
}
