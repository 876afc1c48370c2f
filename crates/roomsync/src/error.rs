//! Error types for the room sync service.

use roomsync_core::CoreError;
use roomsync_store::StoreError;
use roomsync_sync::SyncError;
use thiserror::Error;

/// Errors from service construction and plumbing.
///
/// Login and sync outcomes are not errors; queries return booleans, status
/// values and snapshots.
#[derive(Debug, Error)]
pub enum RoomSyncError {
    /// Malformed key or routing data.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync engine error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The service was shut down.
    #[error("room sync service is shut down")]
    ShutDown,
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, RoomSyncError>;
