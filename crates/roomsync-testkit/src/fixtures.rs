//! Test fixtures and helpers.
//!
//! Common setup code for scenario tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use roomsync::{Result, RoomSync};
use roomsync_core::{Clock, Contact, NodeKind, PublicKey, RoutingDescriptor, PREFIX_LEN};
use roomsync_store::{MemoryStore, Store};
use roomsync_sync::{MemoryDirectory, SyncConfig, TransportEvent};

use crate::radio::ScriptedRadio;

/// Wall-clock start of every fixture clock.
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// A deterministic room key. Distinct `n` give distinct prefixes.
pub fn room_key(n: u8) -> PublicKey {
    let mut bytes = [n; 32];
    bytes[0] = 0x5a;
    bytes[PREFIX_LEN] = 0xa5;
    PublicKey::from_bytes(bytes)
}

/// A random room key that avoids `taken` prefixes.
pub fn random_room_key(taken: &[PublicKey]) -> PublicKey {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    loop {
        let key = PublicKey::from_bytes(rng.gen());
        if taken.iter().all(|t| t.prefix() != key.prefix()) {
            return key;
        }
    }
}

/// A room key starting with `prefix`. Keys built from the same prefix
/// collide on the wire.
pub fn room_key_with_prefix(prefix: [u8; PREFIX_LEN], n: u8) -> PublicKey {
    let mut bytes = [n; 32];
    bytes[..PREFIX_LEN].copy_from_slice(&prefix);
    PublicKey::from_bytes(bytes)
}

/// A room contact for `key` reachable by flood.
pub fn room_contact(key: PublicKey) -> Contact {
    Contact::room(key, format!("room-{}", &key.to_hex()[..8]))
}

/// A room contact with a fixed path of `hops` relays.
pub fn room_contact_via(key: PublicKey, hops: usize) -> Contact {
    let path: Vec<u8> = (0..hops).map(|h| h as u8).collect();
    let routing = RoutingDescriptor::fixed(path).unwrap_or(RoutingDescriptor::Flood);
    room_contact(key).with_routing(routing)
}

/// A chat contact, which is never logged in to.
pub fn chat_contact(key: PublicKey) -> Contact {
    Contact {
        public_key: key,
        name: format!("chat-{}", &key.to_hex()[..8]),
        kind: NodeKind::Chat,
        routing: RoutingDescriptor::Flood,
    }
}

/// Inbound frame builders.
pub mod frames {
    use bytes::{BufMut, Bytes, BytesMut};
    use roomsync_core::{opcode, PublicKey};

    fn login_result(code: u8, room: &PublicKey) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(code);
        // Reserved byte, then the prefix, then a timestamp the engine ignores.
        buf.put_u8(0);
        buf.put_slice(&room.prefix().0);
        buf.put_u32_le(0x6553_f100);
        buf.freeze()
    }

    pub fn login_success(room: &PublicKey) -> Bytes {
        login_result(opcode::PUSH_LOGIN_SUCCESS, room)
    }

    pub fn login_fail(room: &PublicKey) -> Bytes {
        login_result(opcode::PUSH_LOGIN_FAIL, room)
    }

    pub fn no_more_messages() -> Bytes {
        Bytes::from_static(&[opcode::RESP_NO_MORE_MESSAGES])
    }

    /// A contact message delivery. The body is opaque to the engine.
    pub fn queued_message() -> Bytes {
        Bytes::from_static(&[opcode::RESP_CONTACT_MSG_RECV_V3, 0, 0, 0x01, b'h', b'i'])
    }

    pub fn message_waiting() -> Bytes {
        Bytes::from_static(&[opcode::PUSH_MSG_WAITING])
    }
}

/// A clock moved by hand.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(START_MILLIS)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A service wired to a scripted radio.
pub struct TestFixture<S: Store + 'static = MemoryStore> {
    pub service: RoomSync<S, ScriptedRadio>,
    pub radio: Arc<ScriptedRadio>,
    pub directory: Arc<MemoryDirectory>,
    pub clock: Arc<ManualClock>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl TestFixture<MemoryStore> {
    /// Fixture over a fresh memory store.
    pub async fn new(config: SyncConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
            .await
            .unwrap_or_else(|e| panic!("fixture setup failed: {}", e))
    }
}

impl<S: Store + 'static> TestFixture<S> {
    /// Fixture over `store`, with an empty loaded directory.
    pub async fn with_store(store: Arc<S>, config: SyncConfig) -> Result<Self> {
        let (events, events_rx) = mpsc::channel(256);
        let radio = Arc::new(ScriptedRadio::new(events.clone()));
        let directory = Arc::new(MemoryDirectory::new());
        directory.mark_loaded();
        let clock = Arc::new(ManualClock::default());

        let service = RoomSync::builder(store, Arc::clone(&radio), directory.clone())
            .config(config)
            .clock(clock.clone())
            .build()
            .await?;
        service.attach(events_rx);

        Ok(Self {
            service,
            radio,
            directory,
            clock,
            events,
        })
    }

    /// Save a password for `contact` and make it known to the directory.
    pub async fn add_room(&self, contact: Contact, password: &str) {
        let key = contact.public_key;
        self.directory.upsert(contact);
        assert!(self.service.remember_password(&key, password).await);
    }

    pub async fn connect(&self) {
        self.send(TransportEvent::Connected).await;
    }

    pub async fn disconnect(&self) {
        self.send(TransportEvent::Disconnected).await;
    }

    /// Deliver a raw inbound frame.
    pub async fn deliver(&self, frame: bytes::Bytes) {
        self.send(TransportEvent::Frame(frame)).await;
    }

    async fn send(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            panic!("service event pump is gone");
        }
    }
}

/// Let spawned tasks run. Moves paused time forward by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `condition` until it holds, letting tasks run in between.
///
/// Panics after `limit` of (possibly paused) time.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
