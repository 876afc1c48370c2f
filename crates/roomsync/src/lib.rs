//! # Room Sync
//!
//! Keeps a mesh radio companion logged in to its saved room nodes and caught
//! up with the messages they hold.
//!
//! ## Overview
//!
//! Room nodes are store-and-forward endpoints that require a password login.
//! This crate provides:
//!
//! - **Login sweep**: after the radio connects, every saved room is logged in
//!   to, one at a time, with bounded retries
//! - **Sync loop**: a periodic cycle that drains queued messages, backing off
//!   exponentially while rooms do not answer
//! - **Room status**: a derived per-room status for display, with change
//!   notifications
//! - **Durable history**: per-room login and sync history kept in a store
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roomsync::{MemoryDirectory, RecordingRadio, RoomSync, SqliteStore, TransportEvent};
//!
//! async fn example() -> roomsync::Result<()> {
//!     let store = Arc::new(SqliteStore::open("rooms.db")?);
//!     let radio = Arc::new(RecordingRadio::new());
//!     let directory = Arc::new(MemoryDirectory::new());
//!
//!     let service = RoomSync::builder(store, radio, directory).build().await?;
//!
//!     let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
//!     service.attach(events_rx);
//!     events_tx.send(TransportEvent::Connected).await.ok();
//!
//!     service.shutdown().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `roomsync::core` - identities, routing, frame codec, room state
//! - `roomsync::store` - persistence backends
//! - `roomsync::sync` - correlator, login, scheduler

pub mod error;
pub mod service;

// Re-export component crates
pub use roomsync_core as core;
pub use roomsync_store as store;
pub use roomsync_sync as sync;

pub use error::{Result, RoomSyncError};
pub use service::{RoomSync, RoomSyncBuilder};

// Re-export commonly used types
pub use roomsync_core::{
    Contact, NodeKind, PublicKey, RoomSessionState, RoomStateMap, RoomStatus, RoutingDescriptor,
};
pub use roomsync_store::{MemoryStore, SqliteStore, Store};
pub use roomsync_sync::{
    CycleOutcome, MemoryDirectory, NodeDirectory, RadioTransport, RecordingRadio, RoomSyncEvent,
    SyncConfig, TransportEvent,
};
