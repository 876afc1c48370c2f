//! Store trait: the abstract interface for room sync persistence.
//!
//! Backends only move opaque string documents. The typed room state and
//! password documents are encoded as JSON by [`StoreExt`].

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use roomsync_core::RoomStateMap;

use crate::error::Result;

/// Saved room passwords, keyed by full public key hex.
pub type PasswordMap = BTreeMap<String, String>;

/// Document keys.
pub mod keys {
    /// Snapshot of every room's session state.
    pub const ROOM_STATES: &str = "room_sync_states";
    /// Saved room passwords.
    pub const ROOM_PASSWORDS: &str = "room_passwords";
}

/// Key-value persistence backend.
///
/// # Design Notes
///
/// - `put` replaces the whole document.
/// - After `close`, every call returns `StoreError::Closed`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a document.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a document, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a document. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Release the backend.
    async fn close(&self) -> Result<()>;
}

/// Typed documents on top of a [`Store`].
pub trait StoreExt: Store {
    /// Load the room state snapshot. Missing document yields an empty map.
    fn load_room_states(&self) -> impl Future<Output = Result<RoomStateMap>> + Send;

    /// Replace the room state snapshot.
    fn save_room_states(&self, states: &RoomStateMap)
        -> impl Future<Output = Result<()>> + Send;

    /// Load saved passwords. Missing document yields an empty map.
    fn load_room_passwords(&self) -> impl Future<Output = Result<PasswordMap>> + Send;

    /// Replace saved passwords.
    fn save_room_passwords(
        &self,
        passwords: &PasswordMap,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Load room states, substituting an empty map for corrupt or unreadable
    /// data.
    fn load_room_states_or_default(&self) -> impl Future<Output = RoomStateMap> + Send;

    /// Load passwords, substituting an empty map for corrupt or unreadable
    /// data.
    fn load_room_passwords_or_default(&self) -> impl Future<Output = PasswordMap> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn load_room_states(&self) -> Result<RoomStateMap> {
        match self.get(keys::ROOM_STATES).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(RoomStateMap::new()),
        }
    }

    async fn save_room_states(&self, states: &RoomStateMap) -> Result<()> {
        let json = serde_json::to_string(states)?;
        self.put(keys::ROOM_STATES, &json).await
    }

    async fn load_room_passwords(&self) -> Result<PasswordMap> {
        match self.get(keys::ROOM_PASSWORDS).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(PasswordMap::new()),
        }
    }

    async fn save_room_passwords(&self, passwords: &PasswordMap) -> Result<()> {
        let json = serde_json::to_string(passwords)?;
        self.put(keys::ROOM_PASSWORDS, &json).await
    }

    async fn load_room_states_or_default(&self) -> RoomStateMap {
        match self.load_room_states().await {
            Ok(states) => states,
            Err(e) => {
                tracing::warn!("discarding unreadable room states: {}", e);
                RoomStateMap::new()
            }
        }
    }

    async fn load_room_passwords_or_default(&self) -> PasswordMap {
        match self.load_room_passwords().await {
            Ok(passwords) => passwords,
            Err(e) => {
                tracing::warn!("discarding unreadable room passwords: {}", e);
                PasswordMap::new()
            }
        }
    }
}
