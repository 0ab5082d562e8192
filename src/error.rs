/*!
 * Error types for imsbind
 */

use imsbind_connect::ConnectError;
use imsbind_core_resilience::ResilienceError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImsBindError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_SCENARIO: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum ImsBindError {
    /// Configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Configuration parsed but is inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Policy(#[from] ResilienceError),

    /// Logging could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    /// The controller task went away in the middle of a scenario
    #[error(transparent)]
    Controller(#[from] ConnectError),

    /// A scenario step could not be carried out
    #[error("Scenario step {step} ({action}): {reason}")]
    Scenario {
        step: usize,
        action: &'static str,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ImsBindError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ImsBindError::Scenario { .. } | ImsBindError::Controller(_) => EXIT_SCENARIO,
            _ => EXIT_FATAL,
        }
    }

    /// Whether the error comes from the configuration rather than from running it
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ImsBindError::ConfigRead { .. }
                | ImsBindError::ConfigParse(_)
                | ImsBindError::ConfigSerialize(_)
                | ImsBindError::Config(_)
                | ImsBindError::Policy(_)
        )
    }
}
