//! Circuit breaking for failing backends.
//!
//! # States
//! ```text
//! Closed → Open: failures reach the threshold within one period
//! Open → Closed: recover_after consecutive probe successes
//! ```
//!
//! In the Open state a single probe request is admitted at a time;
//! everything else fails fast with `CircuitBreakerOpen`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
}

struct BreakerInner {
    state: BreakerState,
    errors: u32,
    successes: u32,
    interval_ends: Instant,
}

struct BreakerShared {
    inner: RwLock<BreakerInner>,
    // Probe slot: taken non-blockingly, so exactly one request at a time
    // tests an open breaker.
    probe: AsyncMutex<()>,
    threshold: u32,
    period: Duration,
    recover_after: u32,
}

/// Opens after `threshold` failures within `period` and closes again after
/// `recover_after` consecutive probe successes.
pub fn circuit_breaker(threshold: u32, period: Duration, recover_after: u32) -> Middleware {
    let shared = Arc::new(BreakerShared {
        inner: RwLock::new(BreakerInner {
            state: BreakerState::Closed,
            errors: 0,
            successes: 0,
            interval_ends: Instant::now() + period,
        }),
        probe: AsyncMutex::new(()),
        threshold,
        period,
        recover_after,
    });

    Box::new(move |next| {
        Arc::new(CircuitBreaker {
            shared: Arc::clone(&shared),
            next,
        })
    })
}

struct CircuitBreaker {
    shared: Arc<BreakerShared>,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for CircuitBreaker {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let state = self.shared.inner.read().state;

        match state {
            BreakerState::Closed => {
                let result = self.next.handle(conn, req).await;

                if let Err(err) = result {
                    self.shared.record_failure();
                    return Err(err);
                }

                Ok(())
            }
            BreakerState::Open => {
                let Ok(_probe) = self.shared.probe.try_lock() else {
                    return Err(GatewayError::CircuitBreakerOpen);
                };

                match self.next.handle(conn, req).await {
                    Ok(()) => {
                        self.shared.record_probe_success();
                        Ok(())
                    }
                    Err(err) => {
                        self.shared.record_probe_failure();
                        Err(err)
                    }
                }
            }
        }
    }
}

impl BreakerShared {
    fn record_failure(&self) {
        let mut inner = self.inner.write();
        let now = Instant::now();

        // An elapsed measurement interval restarts on the next failure.
        if inner.interval_ends <= now {
            inner.interval_ends = now + self.period;
            inner.errors = 0;
        }

        inner.errors += 1;

        if inner.errors >= self.threshold && inner.state == BreakerState::Closed {
            inner.state = BreakerState::Open;
            tracing::warn!(errors = inner.errors, "circuit breaker opened");
        }
    }

    fn record_probe_success(&self) {
        let mut inner = self.inner.write();
        inner.successes += 1;

        if inner.successes >= self.recover_after {
            inner.state = BreakerState::Closed;
            inner.errors = 0;
            inner.successes = 0;
            tracing::info!("circuit breaker closed");
        }
    }

    fn record_probe_failure(&self) {
        self.inner.write().successes = 0;
    }
}
