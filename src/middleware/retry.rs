//! Retrying with linear or exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{RetryConfig, RetryPolicy};
use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    max_attempts: u32,
    seed: Duration,
    factor: u32,
}

const DEFAULT_DELAY_FACTOR: u32 = 2;

impl RetrySchedule {
    /// Constant interval between attempts.
    pub fn linear(max_attempts: u32, interval: Duration) -> Self {
        Self {
            policy: RetryPolicy::Linear,
            max_attempts,
            seed: interval,
            factor: 1,
        }
    }

    /// `seed * factor^iteration` between attempts.
    pub fn exponential(max_attempts: u32, seed: Duration, factor: u32) -> Self {
        Self {
            policy: RetryPolicy::Exponential,
            max_attempts,
            seed,
            factor,
        }
    }

    /// Exponential schedule with the default factor of two.
    pub fn exponential_with_default_factor(max_attempts: u32, seed: Duration) -> Self {
        Self::exponential(max_attempts, seed, DEFAULT_DELAY_FACTOR)
    }

    /// Interval before retry number `iteration` (zero-based).
    pub fn interval(&self, iteration: u32) -> Duration {
        match self.policy {
            RetryPolicy::Linear => self.seed,
            RetryPolicy::Exponential => self
                .seed
                .saturating_mul(self.factor.saturating_pow(iteration)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl From<&RetryConfig> for RetrySchedule {
    fn from(config: &RetryConfig) -> Self {
        Self {
            policy: config.policy,
            max_attempts: config.max_attempts,
            seed: Duration::from_millis(config.seed_interval_ms),
            factor: config.delay_factor,
        }
    }
}

/// Re-invokes the wrapped handler until it succeeds, the schedule runs out,
/// or the request context is canceled during a backoff wait.
pub fn retry(schedule: RetrySchedule) -> Middleware {
    Box::new(move |next| Arc::new(Retry { schedule, next }))
}

struct Retry {
    schedule: RetrySchedule,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for Retry {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let mut last_err = None;

        for attempt in 0..self.schedule.max_attempts {
            match self.next.handle(Arc::clone(&conn), req.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }

            let more_attempts_left = attempt + 1 < self.schedule.max_attempts;
            if more_attempts_left {
                tokio::select! {
                    _ = tokio::time::sleep(self.schedule.interval(attempt)) => {}
                    _ = req.context().done() => return Err(req.context().error()),
                }
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
