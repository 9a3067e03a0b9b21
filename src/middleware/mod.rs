//! Composable request middleware.
//!
//! Every constructor here returns a
//! [`Middleware`](crate::dispatch::Middleware): a function wrapping one
//! request handler in another. Dispatchers run them in registration order.
//! Middleware carrying state (throttle slots, breaker counters, cache
//! entries) shares it across every handler it wraps.

mod cache;
mod circuit_breaker;
mod error_handler;
mod measure;
mod rate_limit;
mod retry;
mod span;
mod throttle;
mod timeout;

pub use cache::{cache, CacheCloser, RequestCacheKey};
pub use circuit_breaker::circuit_breaker;
pub use error_handler::{error_handler, OnError};
pub use measure::{measurer, SaveMetric};
pub use rate_limit::{rate_limiter, RequestLimit};
pub use retry::{retry, RetrySchedule};
pub use span::span;
pub use throttle::throttler;
pub use timeout::timeout;
