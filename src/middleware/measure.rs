//! Request timing measurement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// Receives `(request, error, elapsed)` after every handled request.
pub type SaveMetric = Arc<dyn Fn(&Request, Option<&GatewayError>, Duration) + Send + Sync>;

/// Times each request and reports it through `save`.
///
/// What `save` does with the measurement is the caller's business; the
/// `metrics` facade macros are a natural fit.
pub fn measurer(save: SaveMetric) -> Middleware {
    Box::new(move |next| {
        Arc::new(Measurer {
            save: Arc::clone(&save),
            next,
        })
    })
}

struct Measurer {
    save: SaveMetric,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for Measurer {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let started = Instant::now();
        let observed = req.clone();

        let result = self.next.handle(conn, req).await;

        (self.save)(&observed, result.as_ref().err(), started.elapsed());

        result
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use crate::channel::Payload;
    use crate::context::Context;
    use crate::dispatch::handler_fn;
    use crate::message::MessageType;
    use crate::testing::MockConnection;

    use super::*;

    #[tokio::test]
    async fn test_reports_duration_and_error() {
        let samples = Arc::new(Mutex::new(Vec::new()));

        let save: SaveMetric = {
            let samples = Arc::clone(&samples);
            Arc::new(move |req, err, elapsed| {
                samples
                    .lock()
                    .push((req.routing_key().to_owned(), err.is_some(), elapsed));
            })
        };

        let slow_failure = handler_fn(|_conn, _req| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(15)).await;
                Err(GatewayError::other("late failure"))
            })
        });

        let handler = measurer(save)(slow_failure);
        let conn = MockConnection::connected();
        let req = Request::new(Context::new(), MessageType::Text, Payload::from_vec(vec![]));

        let _ = handler
            .handle(Arc::clone(&conn) as Arc<dyn Connection>, req)
            .await;

        let samples = samples.lock();
        assert_eq!(samples.len(), 1);

        let (key, failed, elapsed) = &samples[0];
        assert_eq!(key, "text");
        assert!(*failed);
        assert!(*elapsed >= Duration::from_millis(15));
    }
}
