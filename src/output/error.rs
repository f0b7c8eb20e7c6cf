//! Error types of the output subsystem

use thiserror::Error;

/// Failures reported by a virtual bus or one of its targets
#[derive(Debug, Error)]
pub enum TargetError {
    /// The bus driver could not be reached or refused to create a target
    #[error("Virtual bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("Target connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Target is not connected")]
    NotConnected,

    /// The host has not assigned a user index (yet)
    #[error("User index unavailable: {0}")]
    UserIndexUnavailable(String),

    #[error("Report submission failed: {0}")]
    SubmitFailed(String),
}

/// Failures of the output device adapter lifecycle
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// `disconnect` already released the target handle
    #[error("Target handle already released")]
    Released,
}
