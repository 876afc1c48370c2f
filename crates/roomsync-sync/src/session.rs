//! Room state and live sessions.
//!
//! [`SessionTable`] owns the in-memory copy of every room's
//! [`RoomSessionState`], the set of rooms believed to hold a live
//! authenticated session, and the connection epoch.
//!
//! The epoch is bumped on every connect and disconnect. Async callers capture
//! it before suspending and compare it afterwards; a mismatch means the link
//! they were working for is gone and their result must be discarded.
//!
//! Every mutation is persisted as a whole snapshot and announced on the
//! notification channel. Disabling a room or dropping the link also bumps a
//! revision counter, so suspended work can stop at once via
//! [`SessionTable::revoked`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};

use roomsync_core::{Clock, PublicKey, RoomSessionState, RoomStateMap};
use roomsync_store::{Store, StoreExt};

use crate::events::{RoomSyncEvent, EVENT_CHANNEL_CAPACITY};

#[derive(Default)]
struct Tables {
    rooms: RoomStateMap,
    active: BTreeSet<PublicKey>,
    connected: bool,
    epoch: u64,
}

impl Tables {
    fn room_mut(&mut self, key: &PublicKey) -> &mut RoomSessionState {
        self.rooms.entry(key.to_hex()).or_default()
    }

    fn is_enabled(&self, key: &PublicKey) -> bool {
        self.rooms
            .get(&key.to_hex())
            .map_or(true, |state| state.auto_sync_enabled)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.connected && self.epoch == epoch
    }
}

/// Room states, the active session set and the connection epoch.
pub struct SessionTable<S: Store + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
    /// Serializes snapshot writes so a newer snapshot never lands first.
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<RoomSyncEvent>,
    revisions: watch::Sender<u64>,
}

impl<S: Store + ?Sized> SessionTable<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (revisions, _) = watch::channel(0);
        Self {
            store,
            clock,
            tables: Mutex::new(Tables::default()),
            persist_lock: tokio::sync::Mutex::new(()),
            events,
            revisions,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Replace the in-memory states with the persisted snapshot.
    ///
    /// Unreadable data is discarded with a warning.
    pub async fn load(&self) -> usize {
        let rooms = self.store.load_room_states_or_default().await;
        let count = rooms.len();
        self.tables().rooms = rooms;
        tracing::debug!(rooms = count, "loaded room states");
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// State of one room, defaulted if the room was never seen.
    pub fn state(&self, key: &PublicKey) -> RoomSessionState {
        self.tables()
            .rooms
            .get(&key.to_hex())
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> RoomStateMap {
        self.tables().rooms.clone()
    }

    pub fn is_enabled(&self, key: &PublicKey) -> bool {
        self.tables().is_enabled(key)
    }

    pub fn has_session(&self, key: &PublicKey) -> bool {
        self.tables().active.contains(key)
    }

    pub fn active_sessions(&self) -> Vec<PublicKey> {
        self.tables().active.iter().copied().collect()
    }

    /// Active rooms whose auto-sync is still on.
    pub fn enabled_active_sessions(&self) -> Vec<PublicKey> {
        let tables = self.tables();
        tables
            .active
            .iter()
            .filter(|key| tables.is_enabled(key))
            .copied()
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.tables().connected
    }

    /// The epoch of the live link, if connected.
    pub fn current_epoch(&self) -> Option<u64> {
        let tables = self.tables();
        tables.connected.then_some(tables.epoch)
    }

    /// Whether the link captured as `epoch` is still up.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.tables().is_current(epoch)
    }

    /// Whether work for `key` started under `epoch` may still land.
    pub fn may_proceed(&self, key: &PublicKey, epoch: u64) -> bool {
        let tables = self.tables();
        tables.is_current(epoch) && tables.is_enabled(key)
    }

    /// Resolves once work for `key` started under `epoch` may no longer
    /// land, because the room was disabled or the link dropped.
    pub async fn revoked(&self, key: &PublicKey, epoch: u64) {
        let mut revisions = self.revisions.subscribe();
        // The sender lives in `self`, so this only returns on a match.
        let _ = revisions
            .wait_for(|_| !self.may_proceed(key, epoch))
            .await;
    }

    /// Wake everything parked in [`revoked`](Self::revoked). Must not be
    /// called with the tables locked.
    fn revise(&self) {
        self.revisions
            .send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Link lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// The link came up. Returns the new epoch.
    pub fn link_up(&self) -> u64 {
        let mut tables = self.tables();
        tables.epoch += 1;
        tables.connected = true;
        tables.epoch
    }

    /// The link went down. Every session is forgotten; history is kept.
    pub fn link_down(&self) -> u64 {
        let epoch = {
            let mut tables = self.tables();
            tables.epoch += 1;
            tables.connected = false;
            tables.active.clear();
            tables.epoch
        };
        self.revise();
        self.notify(RoomSyncEvent::SessionsCleared);
        epoch
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Set a room's auto-sync toggle. Disabling drops its session.
    ///
    /// Returns whether the toggle changed.
    pub async fn set_enabled(&self, key: &PublicKey, enabled: bool) -> bool {
        let changed = {
            let mut tables = self.tables();
            let state = tables.room_mut(key);
            let changed = state.auto_sync_enabled != enabled;
            state.auto_sync_enabled = enabled;
            if !enabled {
                tables.active.remove(key);
            }
            changed
        };
        if !enabled {
            self.revise();
        }

        self.persist().await;
        self.notify(RoomSyncEvent::RoomUpdated(*key));
        changed
    }

    /// Stamp a login attempt, unless the room was disabled or the link
    /// dropped. Returns whether the attempt may go ahead.
    pub async fn record_login_attempt(&self, key: &PublicKey, epoch: u64) -> bool {
        let now = self.now();
        {
            let mut tables = self.tables();
            if !(tables.is_current(epoch) && tables.is_enabled(key)) {
                return false;
            }
            tables.room_mut(key).record_login_attempt(now);
        }

        self.persist().await;
        self.notify(RoomSyncEvent::RoomUpdated(*key));
        true
    }

    /// Record a successful login and open the session.
    ///
    /// Returns `false` without touching anything if the room was disabled or
    /// the link dropped since `epoch`.
    pub async fn record_login_success(&self, key: &PublicKey, epoch: u64) -> bool {
        let now = self.now();
        {
            let mut tables = self.tables();
            if !(tables.is_current(epoch) && tables.is_enabled(key)) {
                return false;
            }
            tables.room_mut(key).record_login_success(now);
            tables.active.insert(*key);
        }

        self.persist().await;
        self.notify(RoomSyncEvent::RoomUpdated(*key));
        true
    }

    /// Record that every login attempt failed. Same preconditions as
    /// [`record_login_success`](Self::record_login_success).
    pub async fn record_login_failure(&self, key: &PublicKey, epoch: u64) -> bool {
        let now = self.now();
        {
            let mut tables = self.tables();
            if !(tables.is_current(epoch) && tables.is_enabled(key)) {
                return false;
            }
            tables.room_mut(key).record_failure(now);
        }

        self.persist().await;
        self.notify(RoomSyncEvent::RoomUpdated(*key));
        true
    }

    /// Apply a sync cycle outcome to every enabled active room.
    ///
    /// Returns how many rooms were updated.
    pub async fn record_sync_outcome(&self, success: bool) -> usize {
        let now = self.now();
        let rooms: Vec<PublicKey> = {
            let mut tables = self.tables();
            let rooms: Vec<PublicKey> = tables
                .active
                .iter()
                .filter(|key| tables.is_enabled(key))
                .copied()
                .collect();
            for key in &rooms {
                let state = tables.room_mut(key);
                if success {
                    state.record_sync_success(now);
                } else {
                    state.record_failure(now);
                }
            }
            rooms
        };

        if rooms.is_empty() {
            return 0;
        }

        self.persist().await;
        for key in &rooms {
            self.notify(RoomSyncEvent::RoomUpdated(*key));
        }
        rooms.len()
    }

    /// Write the current snapshot. Failures are logged, never returned.
    pub async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save_room_states(&snapshot).await {
            tracing::warn!("failed to persist room states: {}", e);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────────

    pub fn notify(&self, event: RoomSyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomSyncEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomsync_store::MemoryStore;

    const NOW: i64 = 1_700_000_000_000;

    fn table() -> SessionTable<MemoryStore> {
        SessionTable::new(Arc::new(MemoryStore::new()), Arc::new(|| NOW))
    }

    fn key(n: u8) -> PublicKey {
        PublicKey::from_bytes([n; 32])
    }

    #[tokio::test]
    async fn test_login_success_opens_session() {
        let sessions = table();
        let epoch = sessions.link_up();
        let mut events = sessions.subscribe();

        assert!(sessions.record_login_attempt(&key(1), epoch).await);
        assert!(sessions.record_login_success(&key(1), epoch).await);

        assert!(sessions.has_session(&key(1)));
        let state = sessions.state(&key(1));
        assert_eq!(state.last_login_attempt_at, Some(NOW));
        assert_eq!(state.last_login_success_at, Some(NOW));
        assert_eq!(events.recv().await.unwrap(), RoomSyncEvent::RoomUpdated(key(1)));

        // Persisted.
        let stored = sessions.store().load_room_states().await.unwrap();
        assert_eq!(stored.get(&key(1).to_hex()), Some(&state));
    }

    #[tokio::test]
    async fn test_stale_epoch_is_discarded() {
        let sessions = table();
        let epoch = sessions.link_up();
        sessions.link_down();
        sessions.link_up();

        assert!(!sessions.record_login_success(&key(1), epoch).await);
        assert!(!sessions.has_session(&key(1)));
        assert_eq!(sessions.state(&key(1)), RoomSessionState::default());
        assert!(sessions.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_room_is_not_touched() {
        let sessions = table();
        let epoch = sessions.link_up();
        sessions.set_enabled(&key(1), false).await;

        assert!(!sessions.record_login_attempt(&key(1), epoch).await);
        assert!(!sessions.record_login_failure(&key(1), epoch).await);
        let state = sessions.state(&key(1));
        assert_eq!(state.last_login_attempt_at, None);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_disable_drops_session_keeps_history() {
        let sessions = table();
        let epoch = sessions.link_up();
        sessions.record_login_success(&key(1), epoch).await;

        assert!(sessions.set_enabled(&key(1), false).await);
        assert!(!sessions.has_session(&key(1)));
        assert_eq!(sessions.state(&key(1)).last_login_success_at, Some(NOW));
        assert!(!sessions.set_enabled(&key(1), false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_wakes_on_disable_and_link_down() {
        let sessions = Arc::new(table());
        let epoch = sessions.link_up();

        let waiting = Arc::clone(&sessions);
        let disabled = tokio::spawn(async move { waiting.revoked(&key(1), epoch).await });
        let waiting = Arc::clone(&sessions);
        let dropped = tokio::spawn(async move { waiting.revoked(&key(2), epoch).await });
        tokio::task::yield_now().await;
        assert!(!disabled.is_finished());

        sessions.set_enabled(&key(1), false).await;
        disabled.await.unwrap();
        assert!(!dropped.is_finished());

        sessions.link_down();
        dropped.await.unwrap();

        // Already revoked resolves straight away.
        sessions.revoked(&key(3), epoch).await;
    }

    #[tokio::test]
    async fn test_link_down_clears_sessions() {
        let sessions = table();
        let epoch = sessions.link_up();
        sessions.record_login_success(&key(1), epoch).await;
        sessions.record_login_success(&key(2), epoch).await;
        let mut events = sessions.subscribe();

        sessions.link_down();

        assert!(sessions.active_sessions().is_empty());
        assert!(!sessions.is_current(epoch));
        assert_eq!(sessions.current_epoch(), None);
        assert_eq!(events.recv().await.unwrap(), RoomSyncEvent::SessionsCleared);
        assert_eq!(sessions.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_outcome_touches_enabled_active_rooms_only() {
        let sessions = table();
        let epoch = sessions.link_up();
        for n in 1..=3 {
            sessions.record_login_success(&key(n), epoch).await;
        }
        sessions.set_enabled(&key(2), false).await;

        assert_eq!(sessions.record_sync_outcome(false).await, 2);
        assert_eq!(sessions.state(&key(1)).consecutive_failures, 1);
        assert_eq!(sessions.state(&key(2)).consecutive_failures, 0);
        assert_eq!(sessions.state(&key(3)).last_failure_at, Some(NOW));

        assert_eq!(sessions.record_sync_outcome(true).await, 2);
        assert_eq!(sessions.state(&key(1)).consecutive_failures, 0);
        assert_eq!(sessions.state(&key(1)).last_successful_sync_at, Some(NOW));
        assert_eq!(sessions.state(&key(2)).last_successful_sync_at, None);
    }

    #[tokio::test]
    async fn test_load_adopts_persisted_states() {
        let store = Arc::new(MemoryStore::new());
        let mut states = RoomStateMap::new();
        let mut state = RoomSessionState::default();
        state.auto_sync_enabled = false;
        states.insert(key(4).to_hex(), state);
        store.save_room_states(&states).await.unwrap();

        let sessions = SessionTable::new(store, Arc::new(|| NOW));
        assert_eq!(sessions.load().await, 1);
        assert!(!sessions.is_enabled(&key(4)));
        assert!(sessions.is_enabled(&key(5)));
    }
}
