//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    docs: HashMap<String, String>,
    writes: usize,
    closed: bool,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.read().writes
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.read();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        Ok(inner.docs.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.write();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner.docs.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.write();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner.docs.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.write().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{keys, PasswordMap, StoreExt};
    use roomsync_core::{RoomSessionState, RoomStateMap};

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();

        let mut states = RoomStateMap::new();
        let mut state = RoomSessionState::default();
        state.record_failure(42);
        states.insert("aa".repeat(32), state.clone());

        store.save_room_states(&states).await.unwrap();
        let loaded = store.load_room_states().await.unwrap();
        assert_eq!(loaded.get(&"aa".repeat(32)), Some(&state));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_documents_are_empty() {
        let store = MemoryStore::new();
        assert!(store.load_room_states().await.unwrap().is_empty());
        assert!(store.load_room_passwords().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_states_adopt_empty() {
        let store = MemoryStore::new();
        store.put(keys::ROOM_STATES, "{not json").await.unwrap();

        assert!(store.load_room_states().await.is_err());
        assert!(store.load_room_states_or_default().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_passwords_adopt_empty() {
        let store = MemoryStore::new();
        store.put(keys::ROOM_PASSWORDS, "[1, 2, 3]").await.unwrap();
        assert!(store.load_room_passwords_or_default().await.is_empty());

        let mut passwords = PasswordMap::new();
        passwords.insert("bb".repeat(32), "secret".into());
        store.save_room_passwords(&passwords).await.unwrap();
        assert_eq!(store.load_room_passwords_or_default().await, passwords);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.get("x").await, Err(StoreError::Closed)));
        assert!(matches!(store.put("x", "y").await, Err(StoreError::Closed)));
        assert!(store.load_room_states_or_default().await.is_empty());
    }
}
