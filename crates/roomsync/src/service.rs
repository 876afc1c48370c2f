//! The room sync service.
//!
//! [`RoomSync`] wires the engine components to a radio transport, a node
//! directory and a store, and reacts to link and toggle changes:
//!
//! - **Connected**: new epoch, sync loop restarted at base, login sweep over
//!   saved rooms.
//! - **Disconnected**: timers, cycle and logins cancelled, sessions and
//!   pending correlations cleared. History is kept.
//! - **Room disabled**: session dropped, history kept.
//! - **Room enabled while connected**: one login for that room.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use roomsync_core::{
    derive_status, Clock, Contact, DefaultTimeoutPolicy, PublicKey, RoomSessionState,
    RoomStateMap, RoomStatus, StatusInputs, SystemClock, TimeoutPolicy,
};
use roomsync_store::{Store, StoreExt};
use roomsync_sync::{
    ConfigHandle, Correlator, CycleOutcome, FrameDisposition, LoginManager, NodeDirectory,
    RadioTransport, RoomSyncEvent, SessionTable, SyncConfig, SyncScheduler, TransportEvent,
};

use crate::error::{Result, RoomSyncError};

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    sweep: Option<JoinHandle<()>>,
    room_logins: Vec<JoinHandle<()>>,
}

struct Inner<S: Store + ?Sized, T: RadioTransport + ?Sized> {
    config: ConfigHandle,
    store: Arc<S>,
    directory: Arc<dyn NodeDirectory>,
    sessions: Arc<SessionTable<S>>,
    correlator: Arc<Correlator>,
    logins: Arc<LoginManager<S, T>>,
    scheduler: Arc<SyncScheduler<S, T>>,
    tasks: Mutex<Tasks>,
    shut_down: AtomicBool,
}

/// Keeps a companion radio logged in to its saved rooms and caught up with
/// their queued messages.
///
/// Cloning yields another handle to the same service.
pub struct RoomSync<S: Store + ?Sized, T: RadioTransport + ?Sized> {
    inner: Arc<Inner<S, T>>,
}

impl<S: Store + ?Sized, T: RadioTransport + ?Sized> Clone for RoomSync<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`RoomSync`].
pub struct RoomSyncBuilder<S: Store + ?Sized, T: RadioTransport + ?Sized> {
    store: Arc<S>,
    radio: Arc<T>,
    directory: Arc<dyn NodeDirectory>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn TimeoutPolicy>,
}

impl<S, T> RoomSyncBuilder<S, T>
where
    S: Store + ?Sized + 'static,
    T: RadioTransport + ?Sized + 'static,
{
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timeout_policy(mut self, policy: Arc<dyn TimeoutPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the configuration, load persisted room states and assemble
    /// the service. Nothing runs until the link comes up.
    pub async fn build(self) -> Result<RoomSync<S, T>> {
        self.config.validate()?;
        let config = ConfigHandle::new(self.config);

        let sessions = Arc::new(SessionTable::new(Arc::clone(&self.store), self.clock));
        sessions.load().await;

        let correlator = Arc::new(Correlator::new());
        let logins = Arc::new(LoginManager::new(
            Arc::clone(&sessions),
            Arc::clone(&correlator),
            Arc::clone(&self.radio),
            self.policy,
            config.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            Arc::clone(&sessions),
            Arc::clone(&correlator),
            self.radio,
            config.clone(),
        ));

        Ok(RoomSync {
            inner: Arc::new(Inner {
                config,
                store: self.store,
                directory: self.directory,
                sessions,
                correlator,
                logins,
                scheduler,
                tasks: Mutex::new(Tasks::default()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

impl<S, T> RoomSync<S, T>
where
    S: Store + ?Sized + 'static,
    T: RadioTransport + ?Sized + 'static,
{
    /// Start building a service over the given collaborators.
    pub fn builder(
        store: Arc<S>,
        radio: Arc<T>,
        directory: Arc<dyn NodeDirectory>,
    ) -> RoomSyncBuilder<S, T> {
        RoomSyncBuilder {
            store,
            radio,
            directory,
            config: SyncConfig::default(),
            clock: Arc::new(SystemClock),
            policy: Arc::new(DefaultTimeoutPolicy::default()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport events
    // ─────────────────────────────────────────────────────────────────────────

    /// Consume transport events from `events` on a background task.
    ///
    /// Replaces any previously attached stream.
    pub fn attach(&self, mut events: mpsc::Receiver<TransportEvent>) {
        let this = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_event(event);
            }
            tracing::debug!("transport event stream ended");
        });

        if let Some(previous) = self.inner.tasks().pump.replace(pump) {
            previous.abort();
        }
    }

    /// React to one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.inner.on_connected(),
            TransportEvent::Disconnected => self.inner.on_disconnected(),
            TransportEvent::Frame(frame) => self.inner.on_frame(&frame),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-room toggles and passwords
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_room_auto_sync_enabled(&self, room: &PublicKey) -> bool {
        self.inner.sessions.is_enabled(room)
    }

    /// Switch auto-sync for one room. Returns whether the toggle changed.
    ///
    /// Disabling drops the room's session at once. Enabling while connected
    /// starts a login for that room alone.
    pub async fn set_room_auto_sync_enabled(&self, room: &PublicKey, enabled: bool) -> bool {
        let changed = self.inner.sessions.set_enabled(room, enabled).await;
        if changed {
            tracing::info!(room = %room, enabled, "room auto-sync toggled");
            if enabled {
                Inner::spawn_room_login(&self.inner, *room);
            }
        }
        changed
    }

    /// Save the password used to log in to `room`.
    pub async fn remember_password(&self, room: &PublicKey, password: &str) -> bool {
        let store = &self.inner.store;
        let mut passwords = store.load_room_passwords_or_default().await;
        passwords.insert(room.to_hex(), password.to_string());
        match store.save_room_passwords(&passwords).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(room = %room, "failed to save room password: {}", e);
                false
            }
        }
    }

    /// Forget the saved password for `room`. Returns whether one was saved.
    pub async fn forget_password(&self, room: &PublicKey) -> bool {
        let store = &self.inner.store;
        let mut passwords = store.load_room_passwords_or_default().await;
        if passwords.remove(&room.to_hex()).is_none() {
            return false;
        }
        if let Err(e) = store.save_room_passwords(&passwords).await {
            tracing::warn!(room = %room, "failed to save room passwords: {}", e);
            return false;
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn room_state(&self, room: &PublicKey) -> RoomSessionState {
        self.inner.sessions.state(room)
    }

    /// Snapshot of every known room's state.
    pub fn room_states(&self) -> RoomStateMap {
        self.inner.sessions.snapshot()
    }

    pub fn room_status(&self, room: &PublicKey) -> RoomStatus {
        let config = self.inner.config.get();
        let state = self.inner.sessions.state(room);
        derive_status(StatusInputs {
            sync_enabled: config.sync_enabled,
            state: &state,
            sync_in_flight: self.inner.scheduler.is_in_flight(),
            has_session: self.inner.sessions.has_session(room),
            now: self.inner.sessions.now(),
            stale_after: config.stale_after(),
        })
    }

    /// Whether the room is logged in but has not synced recently.
    pub fn is_room_stale(&self, room: &PublicKey) -> bool {
        let stale_after = self.inner.config.get().stale_after();
        self.inner.sessions.has_session(room)
            && self
                .inner
                .sessions
                .state(room)
                .is_sync_stale(self.inner.sessions.now(), stale_after)
    }

    pub fn has_session(&self, room: &PublicKey) -> bool {
        self.inner.sessions.has_session(room)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.sessions.is_connected()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.scheduler.is_in_flight()
    }

    /// The interval the next sync cycle will be scheduled at.
    pub fn sync_interval(&self) -> std::time::Duration {
        self.inner.scheduler.current_interval()
    }

    /// Change notifications, fired after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomSyncEvent> {
        self.inner.sessions.subscribe()
    }

    /// Run a sync cycle now and wait for it.
    pub async fn sync_now(&self) -> CycleOutcome {
        self.inner.scheduler.run_cycle().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration and lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> SyncConfig {
        self.inner.config.get()
    }

    /// Replace the configuration.
    ///
    /// Turning sync off stops the loop; turning it on while connected
    /// restarts it at the base interval.
    pub fn update_config(&self, config: SyncConfig) -> Result<()> {
        config.validate()?;
        let enabled = config.sync_enabled;
        let previous = self.inner.config.replace(config);

        if previous.sync_enabled && !enabled {
            tracing::info!("room sync switched off");
            self.inner.scheduler.stop();
        } else if !previous.sync_enabled && enabled && self.inner.sessions.is_connected() {
            tracing::info!("room sync switched on");
            self.inner.scheduler.start();
        }

        self.inner.sessions.notify(RoomSyncEvent::ConfigChanged);
        Ok(())
    }

    /// Stop all work and close the store.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Err(RoomSyncError::ShutDown);
        }
        if let Some(pump) = self.inner.tasks().pump.take() {
            pump.abort();
        }
        self.inner.teardown();
        self.inner.store.close().await?;
        tracing::info!("room sync shut down");
        Ok(())
    }
}

impl<S, T> Inner<S, T>
where
    S: Store + ?Sized + 'static,
    T: RadioTransport + ?Sized + 'static,
{
    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn on_connected(self: &Arc<Self>) {
        if self.is_shut_down() {
            return;
        }
        if self.sessions.is_connected() {
            // Connected twice without a disconnect: the old link is gone.
            self.teardown();
        }
        let epoch = self.sessions.link_up();
        tracing::info!(epoch, "radio connected");

        self.scheduler.start();

        if self.config.get().auto_login_enabled {
            self.spawn_sweep();
        }
    }

    fn on_disconnected(&self) {
        self.teardown();
        tracing::info!("radio disconnected");
    }

    /// Cancel everything tied to the link. History stays.
    fn teardown(&self) {
        self.sessions.link_down();
        self.scheduler.stop();
        {
            let mut tasks = self.tasks();
            if let Some(sweep) = tasks.sweep.take() {
                sweep.abort();
            }
            for login in tasks.room_logins.drain(..) {
                login.abort();
            }
        }
        self.logins.cancel_all();
        self.correlator.clear();
    }

    fn on_frame(&self, frame: &[u8]) {
        match self.correlator.on_frame(frame) {
            FrameDisposition::MessageWaiting => {
                if self.config.get().sync_enabled && self.sessions.is_connected() {
                    tracing::debug!("messages waiting, syncing now");
                    self.scheduler.trigger_now();
                }
            }
            FrameDisposition::Ignored => {}
            disposition => tracing::trace!(?disposition, "frame dispatched"),
        }
    }

    fn spawn_sweep(self: &Arc<Self>) {
        let mut tasks = self.tasks();
        if tasks.sweep.as_ref().is_some_and(|sweep| !sweep.is_finished()) {
            tracing::debug!("login sweep already running");
            return;
        }
        let this = Arc::clone(self);
        tasks.sweep = Some(tokio::spawn(async move { this.sweep().await }));
    }

    /// Log in to every saved room, one at a time, in key order.
    async fn sweep(&self) {
        let config = self.config.get();
        if !self.directory.wait_until_loaded(config.directory_wait()).await {
            tracing::debug!("node directory still loading, sweeping with known nodes");
        }

        let passwords = self.store.load_room_passwords_or_default().await;
        let mut logged_in = 0usize;
        for (hex, password) in &passwords {
            if !self.config.get().auto_login_enabled || !self.sessions.is_connected() {
                break;
            }
            let Some(room) = self.eligible_room(hex) else {
                continue;
            };
            if self.logins.login(&room, password).await {
                logged_in += 1;
            }
        }
        tracing::info!(saved = passwords.len(), logged_in, "login sweep finished");
    }

    fn eligible_room(&self, hex: &str) -> Option<Contact> {
        let key = match PublicKey::from_hex(hex) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(key = hex, "skipping saved password with bad key: {}", e);
                return None;
            }
        };
        let room = match self.directory.contact(&key) {
            Some(contact) if contact.is_room() => contact,
            _ => {
                tracing::debug!(room = %key, "saved room not in directory");
                return None;
            }
        };
        if !self.sessions.is_enabled(&key) || self.sessions.has_session(&key) {
            return None;
        }
        Some(room)
    }

    fn spawn_room_login(self: &Arc<Self>, key: PublicKey) {
        if self.is_shut_down() || !self.sessions.is_connected() {
            return;
        }

        let this = Arc::clone(self);
        let login = tokio::spawn(async move {
            let passwords = this.store.load_room_passwords_or_default().await;
            let Some(password) = passwords.get(&key.to_hex()) else {
                tracing::debug!(room = %key, "no saved password, not logging in");
                return;
            };
            if let Some(room) = this.eligible_room(&key.to_hex()) {
                this.logins.login(&room, password).await;
            }
        });

        let mut tasks = self.tasks();
        tasks.room_logins.retain(|login| !login.is_finished());
        tasks.room_logins.push(login);
    }
}
