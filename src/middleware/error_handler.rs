//! Converts handler errors into application-defined behavior.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// Callback invoked when the wrapped handler fails; its result replaces the
/// original outcome. Typical use: render the error into a frame and send it
/// back on the connection.
pub type OnError = Arc<
    dyn Fn(Arc<dyn Connection>, Request, GatewayError) -> BoxFuture<'static, Result<(), GatewayError>>
        + Send
        + Sync,
>;

/// Routes errors from the wrapped handler through `on_error`.
pub fn error_handler(on_error: OnError) -> Middleware {
    Box::new(move |next| {
        Arc::new(ErrorHandler {
            on_error: Arc::clone(&on_error),
            next,
        })
    })
}

struct ErrorHandler {
    on_error: OnError,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for ErrorHandler {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        match self.next.handle(Arc::clone(&conn), req.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => (self.on_error)(conn, req, err).await,
        }
    }
}
