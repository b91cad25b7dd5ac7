//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or validating a record.
#[derive(Error, Debug)]
pub enum Error {
    /// The payload was not valid JSON for an `EditorState`.
    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The record parsed but violates a protocol invariant.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
