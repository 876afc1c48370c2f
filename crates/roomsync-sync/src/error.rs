//! Error types for the sync engine.

use thiserror::Error;

/// Errors that can occur in the sync engine's plumbing.
///
/// Login and sync outcomes are never reported through this type; they are
/// plain booleans and status values.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The radio rejected or failed a transmit.
    #[error("transport error: {0}")]
    Transport(String),

    /// The radio link is down.
    #[error("radio not connected")]
    NotConnected,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] roomsync_store::StoreError),

    /// Configuration values out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Configuration document could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
