//! Change notifications for observers.

use roomsync_core::PublicKey;

/// Something observers may want to re-render for.
///
/// Sent after the mutation it describes has been applied. Receivers that lag
/// behind lose the oldest events; they should re-read state rather than
/// replay events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSyncEvent {
    /// A room's history, toggle or session changed.
    RoomUpdated(PublicKey),
    /// The link dropped and every session was forgotten.
    SessionsCleared,
    /// A sync cycle went in flight.
    SyncStarted,
    /// A sync cycle ended. `rooms` is how many room records it updated.
    SyncFinished { success: bool, rooms: usize },
    /// The configuration was replaced.
    ConfigChanged,
}

/// Capacity of the notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
