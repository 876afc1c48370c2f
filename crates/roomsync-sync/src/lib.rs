//! # Room Sync Engine
//!
//! Login and periodic catch-up sync against room nodes, driven by frames
//! from a companion radio.
//!
//! ## Overview
//!
//! Room nodes store messages while the companion is away. After connecting,
//! the companion logs in to each saved room and then periodically asks the
//! radio for queued messages until it reports an empty queue.
//!
//! ## Components
//!
//! - [`Correlator`] - routes inbound frames to whoever is waiting for them
//! - [`SessionTable`] - room history, live sessions, connection epoch
//! - [`LoginManager`] - room login with bounded retries
//! - [`SyncScheduler`] / [`Backoff`] - the periodic sync loop
//! - [`RadioTransport`] / [`NodeDirectory`] - collaborator boundaries
//!
//! ## Message Flow
//!
//! ```text
//! Companion                           Radio / Room
//!   |-------- Login (0x1A) ----------->|
//!   |<------- LoginSuccess (0x85) -----|   prefix correlates the waiter
//!   |                                  |
//!   |-------- SyncNext (0x0A) -------->|
//!   |<------- Message (0x07..0x11) ----|   drain: request again
//!   |-------- SyncNext (0x0A) -------->|
//!   |<------- NoMoreMessages (0x0A) ---|   cycle succeeded
//!   |                                  |
//!   |<------- MessageWaiting (0x83) ---|   immediate cycle
//! ```

pub mod config;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod events;
pub mod login;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::{ConfigHandle, SyncConfig};
pub use correlator::{Correlator, FrameDisposition, LoginWaiter, SyncSignal, SyncWaiter};
pub use directory::{MemoryDirectory, NodeDirectory};
pub use error::{Result, SyncError};
pub use events::{RoomSyncEvent, EVENT_CHANNEL_CAPACITY};
pub use login::LoginManager;
pub use scheduler::{Backoff, CycleOutcome, SyncScheduler};
pub use session::SessionTable;
pub use transport::{memory::RecordingRadio, RadioTransport, TransportEvent};
