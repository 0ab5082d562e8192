//! imsbind Core Resilience: reconnection primitives
//!
//! # Overview
//!
//! Building blocks used by the service controller to recover from an
//! involuntary loss of its remote connection:
//!
//! - **Rebind Policy**: immutable start/maximum delay pair
//! - **Exponential Backoff**: failure counter that doubles the delay per
//!   consecutive failure and resets on success
//! - **Retry Timer**: a single, cancellable delayed action on the tokio runtime
//!
//! # Key Principles
//!
//! This crate is **pure logic** with no knowledge of what is being
//! reconnected. The controller decides when a cycle failed and when to retry.
//!
//! ```text
//!   connection lost
//!         │
//!         ▼
//! ┌──────────────────────┐
//! │ ExponentialBackoff   │  ← next delay = start · 2^failures (capped)
//! └─────────┬────────────┘
//!           │ delay
//!           ▼
//! ┌──────────────────────┐
//! │ RetryTimer           │  ← one pending rebind, cancellable
//! └─────────┬────────────┘
//!           │ fires
//!           ▼
//!     reconnect attempt ──── success ──> backoff.reset()
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use imsbind_core_resilience::{ExponentialBackoff, RebindPolicy, RetryTimer};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let mut backoff = ExponentialBackoff::new(RebindPolicy::new(
//!     Duration::from_millis(50),
//!     Duration::from_secs(1),
//! ));
//! let mut timer = RetryTimer::new();
//!
//! timer.schedule(backoff.notify_failed(), || {
//!     // post a "rebind now" event to the owner
//! });
//! # }
//! ```

pub mod error;
pub mod rebind;
pub mod timer;

pub use error::ResilienceError;
pub use rebind::{ExponentialBackoff, RebindPolicy};
pub use timer::RetryTimer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::error::ResilienceError;
    pub use super::rebind::{ExponentialBackoff, RebindPolicy};
    pub use super::timer::RetryTimer;
}
