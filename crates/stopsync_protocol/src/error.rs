//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors from model validation and CBOR coding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A stop identifier failed validation.
    #[error("invalid stop id {id:?}: {reason}")]
    InvalidStopId {
        /// The rejected input.
        id: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// CBOR encoding failed.
    #[error("CBOR encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("CBOR decode error: {0}")]
    Decode(String),
}
