//! # Room Sync Testkit
//!
//! Testing utilities for room sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scripted radio**: a [`RadioTransport`](roomsync_sync::RadioTransport)
//!   that answers logins and sync requests per script, through the real
//!   event path
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: room keys, contacts, frame builders, a manual clock and a
//!   fully wired service
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use roomsync_testkit::fixtures::{room_contact, room_key, TestFixture};
//! use roomsync_sync::SyncConfig;
//!
//! async fn example() {
//!     let fixture = TestFixture::new(SyncConfig::default()).await;
//!     fixture.add_room(room_contact(room_key(1)), "hunter2").await;
//!     fixture.connect().await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use roomsync_testkit::generators::sync_config;
//!
//! proptest! {
//!     #[test]
//!     fn configs_validate(config in sync_config()) {
//!         prop_assert!(config.validate().is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod radio;

pub use fixtures::{
    eventually, frames, room_contact, room_key, settle, ManualClock, TestFixture, START_MILLIS,
};
pub use radio::{LoginReply, ScriptedRadio, SyncReply};
