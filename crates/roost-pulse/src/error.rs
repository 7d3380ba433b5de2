//! Error types for the pulse crate.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for pulse operations.
pub type PulseResult<T> = Result<T, PulseError>;

/// Errors that can occur in heartbeat/watchdog/probe plumbing.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Failed to bind the probe listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// Probe server failed while serving.
    #[error("probe server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
