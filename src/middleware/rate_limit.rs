//! Keyed rate limiting over fixed windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// Derives `(key, period, limit)` for a request; requests sharing a key
/// share a window.
pub type RequestLimit = Arc<dyn Fn(&Request) -> (String, Duration, u64) + Send + Sync>;

/// Admits up to `limit` requests per `period` per key, denying the rest
/// with `RateLimitExceeded`.
pub fn rate_limiter(request_limit: RequestLimit) -> Middleware {
    let store = Arc::new(RateStore::new());

    Box::new(move |next| {
        Arc::new(RateLimiter {
            request_limit: Arc::clone(&request_limit),
            store: Arc::clone(&store),
            next,
        })
    })
}

struct RateLimiter {
    request_limit: RequestLimit,
    store: Arc<RateStore>,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for RateLimiter {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let (key, period, limit) = (self.request_limit)(&req);

        self.store.allow(key, period, limit)?;

        self.next.handle(conn, req).await
    }
}

struct Window {
    count: u64,
    resets_at: Instant,
}

/// Fixed-window token store keyed by arbitrary strings.
struct RateStore {
    windows: Mutex<HashMap<String, Window>>,
    next_sweep: Mutex<Instant>,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl RateStore {
    fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            next_sweep: Mutex::new(Instant::now() + SWEEP_INTERVAL),
        }
    }

    fn allow(&self, key: String, period: Duration, limit: u64) -> Result<(), GatewayError> {
        let now = Instant::now();

        self.maybe_sweep(now);

        let mut windows = self.windows.lock();
        let window = windows.entry(key.clone()).or_insert(Window {
            count: 0,
            resets_at: now + period,
        });

        if window.resets_at <= now {
            window.count = 0;
            window.resets_at = now + period;
        }

        if window.count >= limit {
            return Err(GatewayError::RateLimitExceeded { key });
        }

        window.count += 1;

        Ok(())
    }

    /// Drops expired windows so idle keys do not accumulate forever.
    fn maybe_sweep(&self, now: Instant) {
        let mut next_sweep = self.next_sweep.lock();
        if *next_sweep > now {
            return;
        }
        *next_sweep = now + SWEEP_INTERVAL;
        drop(next_sweep);

        self.windows.lock().retain(|_, window| window.resets_at > now);
    }
}
