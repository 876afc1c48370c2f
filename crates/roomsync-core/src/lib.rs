//! # Room Sync Core
//!
//! Pure primitives for keeping a companion session in step with
//! store-and-forward room nodes on a mesh radio.
//!
//! This crate contains no I/O, no storage, no timers. It is pure computation
//! over node identities, routing descriptors, radio frames and per-room state.
//!
//! ## Key Types
//!
//! - [`PublicKey`] - 32-byte node identity
//! - [`NodePrefix`] - 6-byte key prefix used to correlate login results
//! - [`RoutingDescriptor`] - how a node is reached (flood, direct, fixed path)
//! - [`SendPlan`] / [`TimeoutPolicy`] - addressing and wait bounds for a send
//! - [`InboundFrame`] / [`OutboundFrame`] - the companion frame codec
//! - [`RoomSessionState`] / [`RoomStatus`] - durable per-room record and its
//!   derived status

pub mod clock;
pub mod contact;
pub mod error;
pub mod frame;
pub mod room;
pub mod routing;
pub mod types;

pub use clock::{now_millis, Clock, SystemClock};
pub use contact::{Contact, NodeKind};
pub use error::{CoreError, Result};
pub use frame::{opcode, InboundFrame, OutboundFrame, Route};
pub use room::{derive_status, RoomSessionState, RoomStateMap, RoomStatus, StatusInputs};
pub use routing::{
    plan_send, DefaultTimeoutPolicy, RoutingDescriptor, SendPlan, TimeoutPolicy, MAX_PATH_LEN,
    MTU_FLOOR_BYTES,
};
pub use types::{NodePrefix, PublicKey, PREFIX_LEN, PUBLIC_KEY_LEN};
