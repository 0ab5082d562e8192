//! Rebind policy: exponential backoff between automatic reconnection attempts
//!
//! When a remote service connection is lost involuntarily, the owner waits
//! before trying again. The first retry happens after `start_delay`; every
//! further consecutive failure doubles the delay until `maximum_delay` is
//! reached. A successful connection resets the counter.
//!
//! # Example
//!
//! ```
//! use imsbind_core_resilience::rebind::{ExponentialBackoff, RebindPolicy};
//! use std::time::Duration;
//!
//! let policy = RebindPolicy::new(Duration::from_millis(50), Duration::from_millis(150));
//! let mut backoff = ExponentialBackoff::new(policy);
//!
//! assert_eq!(backoff.notify_failed(), Duration::from_millis(50));
//! assert_eq!(backoff.notify_failed(), Duration::from_millis(100));
//! assert_eq!(backoff.notify_failed(), Duration::from_millis(150)); // capped
//!
//! backoff.reset();
//! assert_eq!(backoff.current_delay(), Duration::from_millis(50));
//! ```

use crate::error::ResilienceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable spacing rule for automatic reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebindPolicy {
    /// Delay before the first automatic rebind
    pub start_delay: Duration,

    /// Upper bound for the delay, no matter how many failures occurred
    pub maximum_delay: Duration,
}

impl Default for RebindPolicy {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(2),
            maximum_delay: Duration::from_secs(60),
        }
    }
}

impl RebindPolicy {
    /// Create a policy from explicit delays
    pub fn new(start_delay: Duration, maximum_delay: Duration) -> Self {
        Self {
            start_delay,
            maximum_delay,
        }
    }

    /// Validate the policy
    ///
    /// A zero start delay would turn rebinds into a busy loop, and a maximum
    /// below the start delay cannot be honored.
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.start_delay.is_zero() {
            return Err(ResilienceError::InvalidPolicy(
                "start_delay must be greater than 0".to_string(),
            ));
        }

        if self.maximum_delay < self.start_delay {
            return Err(ResilienceError::InvalidPolicy(format!(
                "maximum_delay ({:?}) must not be lower than start_delay ({:?})",
                self.maximum_delay, self.start_delay
            )));
        }

        Ok(())
    }
}

/// Mutable backoff counter driven by a [`RebindPolicy`]
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: RebindPolicy,
    /// Consecutive failures since the last reset
    retries: u32,
}

impl ExponentialBackoff {
    /// Create a backoff counter starting at zero failures
    pub fn new(policy: RebindPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    /// The policy this counter follows
    pub fn policy(&self) -> &RebindPolicy {
        &self.policy
    }

    /// Number of consecutive failures recorded since the last reset
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay that the next rebind attempt would wait
    pub fn current_delay(&self) -> Duration {
        // 2^31 * start_delay already overflows any sensible maximum
        let factor = 1u32 << self.retries.min(31);
        self.policy
            .start_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.maximum_delay)
            .min(self.policy.maximum_delay)
    }

    /// Record a failed cycle.
    ///
    /// Returns the delay to wait before the retry that follows this failure,
    /// then doubles the delay for the next one.
    pub fn notify_failed(&mut self) -> Duration {
        let delay = self.current_delay();
        self.retries = self.retries.saturating_add(1);
        delay
    }

    /// Forget all recorded failures
    pub fn reset(&mut self) {
        self.retries = 0;
    }
}
