//! Node directory: what the companion knows about other nodes.
//!
//! The directory is filled from the radio's contact list after connecting,
//! which takes a moment. Consumers that need it right after connect wait
//! for [`NodeDirectory::wait_until_loaded`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use roomsync_core::{Contact, PublicKey};

/// Lookup of known nodes.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Wait until the directory has loaded, up to `timeout`.
    ///
    /// Returns whether it finished loading.
    async fn wait_until_loaded(&self, timeout: Duration) -> bool;

    /// Look up a node.
    fn contact(&self, key: &PublicKey) -> Option<Contact>;
}

/// In-memory directory.
pub struct MemoryDirectory {
    contacts: RwLock<HashMap<PublicKey, Contact>>,
    loaded: watch::Sender<bool>,
}

impl MemoryDirectory {
    /// An empty directory that has not finished loading.
    pub fn new() -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            contacts: RwLock::new(HashMap::new()),
            loaded,
        }
    }

    /// A loaded directory holding `contacts`.
    pub fn with_contacts(contacts: impl IntoIterator<Item = Contact>) -> Self {
        let directory = Self::new();
        for contact in contacts {
            directory.upsert(contact);
        }
        directory.mark_loaded();
        directory
    }

    pub fn upsert(&self, contact: Contact) {
        self.contacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contact.public_key, contact);
    }

    pub fn mark_loaded(&self) {
        self.loaded.send_replace(true);
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeDirectory for MemoryDirectory {
    async fn wait_until_loaded(&self, timeout: Duration) -> bool {
        let mut rx = self.loaded.subscribe();
        let loaded = async move { rx.wait_for(|loaded| *loaded).await.is_ok() };
        matches!(tokio::time::timeout(timeout, loaded).await, Ok(true))
    }

    fn contact(&self, key: &PublicKey) -> Option<Contact> {
        self.contacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}
