//! Error types for the room sync core.

use thiserror::Error;

/// Errors raised while building core values from untrusted input.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("path too long: {len} hops exceeds maximum of {max}")]
    PathTooLong { len: usize, max: usize },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
