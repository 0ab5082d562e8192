//! Single-shot, cancellable retry timer
//!
//! A `RetryTimer` owns at most one outstanding delayed action. Scheduling a
//! new action replaces (aborts) the previous one, so callers never end up with
//! two retries racing each other.
//!
//! The timer runs on the current tokio runtime. Aborting only prevents the
//! action from running if it has not started yet; owners that forward the
//! firing into their own queue should still tag it so a firing that was
//! already in flight can be recognized as stale.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Holds the single pending delayed action, if any
#[derive(Debug, Default)]
pub struct RetryTimer {
    pending: Option<JoinHandle<()>>,
}

impl RetryTimer {
    /// Create an idle timer
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Run `action` after `delay`, replacing any pending action
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        trace!("Scheduling retry in {:?}", delay);

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    /// Cancel the pending action. Returns `true` if one was still waiting.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                let was_waiting = !handle.is_finished();
                handle.abort();
                was_waiting
            }
            None => false,
        }
    }

    /// Whether an action is scheduled and has not fired yet
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Forget a firing that already happened
    pub fn clear(&mut self) {
        self.pending = None;
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
