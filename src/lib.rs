/*!
 * imsbind - IMS service binding and feature reconciliation
 *
 * Keeps one remote IMS service bound and its per-slot features in line with
 * the desired configuration:
 * - Connection lifecycle with exponential-backoff rebinding
 * - Feature-set reconciliation, including forced recreation on subscription change
 * - Emergency-only MMTEL promotion and derived capability bits
 * - A shared feature repository with late-joining observers
 *
 * The library crates live under `crates/`; this crate adds configuration,
 * logging and a scripted simulation driven by the `imsbind` binary.
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod report;
pub mod scenario;

// Re-export commonly used types
pub use config::{ImsBindConfig, LogLevel, Step};
pub use error::{ImsBindError, Result};
pub use scenario::{Scenario, ScenarioReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
