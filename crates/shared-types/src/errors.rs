//! Codec error types.

use thiserror::Error;

/// Errors raised when encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Deserialization failed
    #[error("Decoding failed: {0}")]
    Decode(String),
}
