//! Configuration schema for the gateway core.
//!
//! All types derive Serde traits for deserialization from config files and
//! carry defaults matching the documented behavior, so a zero-config
//! construction is always valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection registry limits and timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum concurrent connections; zero or negative means unlimited.
    pub max_connections: i64,

    /// In-flight request callbacks allowed per connection.
    pub concurrency_limit: u32,

    /// Maximum inbound frame size in bytes, enforced at the socket.
    pub frame_size_limit: usize,

    /// Idle time before the connection is closed with `1001 GoingAway`;
    /// zero disables inactivity supervision.
    pub inactivity_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: -1,
            concurrency_limit: 25,
            frame_size_limit: 32_768,
            inactivity_timeout_ms: 0,
        }
    }
}

impl RegistryConfig {
    /// Inactivity timeout as a duration, `None` when disabled.
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        if self.inactivity_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.inactivity_timeout_ms))
        }
    }
}

/// Channel upgrade settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Origin header patterns accepted during the WebSocket handshake.
    /// `*` accepts any origin; `*.example.com` accepts subdomains.
    pub origin_patterns: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            origin_patterns: vec!["*".to_string()],
        }
    }
}

/// HTTP backend client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Overall timeout applied to each outbound call.
    pub timeout_ms: u64,

    /// Idle pooled connections kept per upstream host.
    pub max_conns_per_host: usize,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_conns_per_host: 50,
        }
    }
}

impl HttpBackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry schedule shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Constant interval between attempts.
    Linear,
    /// `seed * factor^iteration` between attempts.
    Exponential,
}

/// Retry middleware settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub policy: RetryPolicy,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base interval between attempts.
    pub seed_interval_ms: u64,

    /// Multiplier for the exponential policy; ignored by the linear one.
    pub delay_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Linear,
            max_attempts: 3,
            seed_interval_ms: 100,
            delay_factor: 2,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within one period that flip the breaker open.
    pub threshold: u32,

    /// Length of the failure-counting period.
    pub period_ms: u64,

    /// Consecutive probe successes required to close the breaker again.
    pub recover_after: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            period_ms: 1_000,
            recover_after: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Server bind settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}
