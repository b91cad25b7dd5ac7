//! Error types for the state coordinator.

use thiserror::Error;

/// Errors surfaced by an editor host implementation.
#[derive(Error, Debug)]
pub enum Error {
    /// The editor API rejected an operation, e.g. a scroll target that
    /// stopped being valid between snapshot and application.
    #[error("Editor host error: {0}")]
    Host(String),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;
