//! Counter of in-flight tasks with an awaitable idle state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Tracks a set of tasks and lets a closer wait until all of them finished.
///
/// Entering returns a guard; dropping the guard marks the task done. Unlike
/// a semaphore there is no upper bound, and unlike a task tracker the group
/// can be reused after it reaches idle.
#[derive(Debug, Default)]
pub(crate) struct WaitGroup {
    count: AtomicUsize,
    idle: Notify,
}

impl WaitGroup {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers one in-flight task.
    pub(crate) fn enter(self: &Arc<Self>) -> WaitGuard {
        self.count.fetch_add(1, Ordering::AcqRel);

        WaitGuard {
            group: Arc::clone(self),
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once the in-flight count reaches zero.
    ///
    /// Returns immediately when nothing is in flight.
    pub(crate) async fn wait_idle(&self) {
        loop {
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }

            // Arm the notification before re-checking so a guard dropped
            // between the check and the await cannot be missed.
            let notified = self.idle.notified();

            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// Marks one task done when dropped.
#[derive(Debug)]
pub(crate) struct WaitGuard {
    group: Arc<WaitGroup>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.group.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.group.idle.notify_waiters();
        }
    }
}
