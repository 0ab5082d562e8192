//! Error types for the imsbind-connect crate

use thiserror::Error;

/// Failure of a call into the remote service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote service is no longer alive")]
    DeadObject,

    #[error("Remote call {call} failed: {reason}")]
    CallFailed { call: &'static str, reason: String },
}

impl RemoteError {
    pub fn call_failed(call: &'static str, reason: impl Into<String>) -> Self {
        RemoteError::CallFailed {
            call,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to users of a controller handle
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Controller for {0} has shut down")]
    ControllerClosed(String),
}
