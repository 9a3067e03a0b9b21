//! Request and connection lifetime contexts.
//!
//! A [`Context`] combines a hierarchical cancellation token with an optional
//! deadline. Connections own a root context; every request derives from it,
//! so closing a connection cancels all of its in-flight requests. The
//! timeout middleware derives child contexts with tighter deadlines instead
//! of spawning timers.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

/// Cancellation scope with an optional deadline.
///
/// Cloning shares the same cancellation state. Use [`Context::child`] to
/// derive a scope that is canceled with its parent but can also be canceled
/// independently.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Creates a root context with no deadline.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a child context: canceled when the parent is canceled, and
    /// inheriting the parent's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child context whose deadline is at most `timeout` from now.
    ///
    /// If the parent already carries an earlier deadline, the earlier one
    /// wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child context with an explicit deadline, clamped to the
    /// parent's deadline if that one is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(inherited) => inherited.min(deadline),
            None => deadline,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the context is canceled or its deadline has elapsed.
    pub fn is_done(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }

        matches!(self.deadline, Some(deadline) if deadline <= Instant::now())
    }

    /// Resolves when the context is canceled or its deadline elapses.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// The error describing why this context is done.
    ///
    /// Reports `DeadlineExceeded` when the deadline elapsed, `Canceled`
    /// otherwise.
    pub fn error(&self) -> GatewayError {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => GatewayError::DeadlineExceeded,
            _ => GatewayError::Canceled,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
