//! # Room Sync Store
//!
//! Persistence for the room sync engine. The engine stores two documents: the
//! snapshot map of per-room session state and the saved room passwords.
//!
//! ## Overview
//!
//! Backends implement the small key-value [`Store`] trait; the typed
//! documents are layered on top by [`StoreExt`]. The primary backend is
//! [`SqliteStore`], with [`MemoryStore`] for tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use roomsync_store::{SqliteStore, StoreExt};
//!
//! async fn example() {
//!     let store = SqliteStore::open("roomsync.db").unwrap();
//!
//!     // Corrupt or missing data loads as an empty map.
//!     let states = store.load_room_states_or_default().await;
//!     store.save_room_states(&states).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Whole-snapshot writes**: every save replaces the full document
//! - **Adopt on failure**: the `_or_default` loaders never fail, they log and
//!   substitute an empty map
//! - **Explicit lifecycle**: [`Store::close`] releases the backend; later calls
//!   return [`StoreError::Closed`]

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{keys, PasswordMap, Store, StoreExt};
