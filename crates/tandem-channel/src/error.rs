//! Error types for the sync channel.

use thiserror::Error;

/// Errors that can occur while setting up the channel.
///
/// Once a channel is running, transport failures are recovered internally
/// via reconnect and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// The listener socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// The underlying socket error.
        source: std::io::Error,
    },

    /// IO error during channel setup.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;
