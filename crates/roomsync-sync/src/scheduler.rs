//! Periodic catch-up sync with exponential backoff.
//!
//! One loop serves every logged-in room. A cycle transmits a sync-next
//! request and waits for the radio to report an empty queue. Each queued
//! message delivered meanwhile triggers the next request, so only one request
//! is ever outstanding.
//!
//! ```text
//!   idle --start--> scheduled --timer/trigger--> in flight
//!                      ^                          |      |
//!                      |        success (base) <--+      +--> failure (x2, capped)
//!                      +--------------------------+------+
//! ```
//!
//! Every spawned task carries the generation it was started under. `stop`
//! bumps the generation and aborts both tasks; anything that still runs
//! afterwards sees the mismatch and leaves the state alone.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use roomsync_core::OutboundFrame;
use roomsync_store::Store;

use crate::config::{ConfigHandle, SyncConfig};
use crate::correlator::{Correlator, SyncSignal};
use crate::events::RoomSyncEvent;
use crate::session::SessionTable;
use crate::transport::RadioTransport;

/// Exponential backoff between sync cycles.
///
/// `n` consecutive failures from a reset give `min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_interval(), config.max_interval())
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn on_success(&mut self) {
        self.reset();
    }

    pub fn on_failure(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }
}

/// How a cycle request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing eligible, or the feature is off.
    Skipped,
    /// A cycle was already running.
    AlreadyInFlight,
    /// The queue drained. `rooms` records were updated.
    Succeeded { rooms: usize },
    /// The guard fired or the transmit failed.
    Failed { rooms: usize },
    /// The scheduler was stopped while the cycle ran.
    Cancelled,
}

struct State {
    backoff: Backoff,
    in_flight: bool,
    timer: Option<JoinHandle<()>>,
    cycle: Option<JoinHandle<()>>,
    generation: u64,
}

/// The sync loop.
///
/// Methods that spawn work take `self: &Arc<Self>`.
pub struct SyncScheduler<S: Store + ?Sized, T: RadioTransport + ?Sized> {
    sessions: Arc<SessionTable<S>>,
    correlator: Arc<Correlator>,
    radio: Arc<T>,
    config: ConfigHandle,
    state: Mutex<State>,
}

impl<S, T> SyncScheduler<S, T>
where
    S: Store + ?Sized + 'static,
    T: RadioTransport + ?Sized + 'static,
{
    pub fn new(
        sessions: Arc<SessionTable<S>>,
        correlator: Arc<Correlator>,
        radio: Arc<T>,
        config: ConfigHandle,
    ) -> Self {
        let backoff = Backoff::from_config(&config.get());
        Self {
            sessions,
            correlator,
            radio,
            config,
            state: Mutex::new(State {
                backoff,
                in_flight: false,
                timer: None,
                cycle: None,
                generation: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_in_flight(&self) -> bool {
        self.state().in_flight
    }

    /// Whether a timer is pending.
    pub fn is_scheduled(&self) -> bool {
        self.state()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// The interval the next cycle will be scheduled at.
    pub fn current_interval(&self) -> Duration {
        self.state().backoff.current()
    }

    /// Reset the interval to base and schedule the first cycle.
    ///
    /// Cancels anything already pending. Does nothing beyond that when sync
    /// is switched off.
    pub fn start(self: &Arc<Self>) {
        let config = self.config.get();
        let mut state = self.state();
        Self::cancel_locked(&mut state);
        state.backoff = Backoff::from_config(&config);
        if config.sync_enabled {
            self.schedule_locked(&mut state, config.base_interval());
        }
    }

    /// Cancel the pending timer and the in-flight cycle. The scheduler is
    /// idle afterwards.
    pub fn stop(&self) {
        let mut state = self.state();
        Self::cancel_locked(&mut state);
    }

    fn cancel_locked(state: &mut State) {
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(cycle) = state.cycle.take() {
            cycle.abort();
        }
        state.in_flight = false;
    }

    fn schedule_locked(self: &Arc<Self>, state: &mut State, delay: Duration) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let generation = state.generation;
        let this = Arc::clone(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = this.launch(Some(generation));
        }));
        tracing::debug!(delay_secs = delay.as_secs(), "sync cycle scheduled");
    }

    /// Replace the pending timer with an immediate cycle.
    ///
    /// Returns whether a cycle was started.
    pub fn trigger_now(self: &Arc<Self>) -> bool {
        self.launch(None).is_ok()
    }

    /// Run one cycle now and wait for it to end.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleOutcome {
        match self.launch(None) {
            Ok(done) => done.await.unwrap_or(CycleOutcome::Cancelled),
            Err(outcome) => outcome,
        }
    }

    /// Start a cycle unless one is running or nothing is eligible.
    fn launch(
        self: &Arc<Self>,
        expected: Option<u64>,
    ) -> std::result::Result<oneshot::Receiver<CycleOutcome>, CycleOutcome> {
        let config = self.config.get();
        let mut state = self.state();

        if expected.is_some_and(|generation| generation != state.generation) {
            return Err(CycleOutcome::Cancelled);
        }
        if state.in_flight {
            tracing::debug!("sync cycle already in flight");
            return Err(CycleOutcome::AlreadyInFlight);
        }
        if let Some(timer) = state.timer.take() {
            // From the timer itself the handle is our own task.
            if expected.is_none() {
                timer.abort();
            }
        }
        if !config.sync_enabled {
            return Err(CycleOutcome::Skipped);
        }

        let rooms = self.sessions.enabled_active_sessions();
        if rooms.is_empty() {
            tracing::debug!("no eligible room sessions, skipping sync cycle");
            state.backoff.reset();
            let base = state.backoff.current();
            self.schedule_locked(&mut state, base);
            return Err(CycleOutcome::Skipped);
        }

        state.in_flight = true;
        let generation = state.generation;
        let (done_tx, done_rx) = oneshot::channel();
        let this = Arc::clone(self);
        state.cycle = Some(tokio::spawn(async move {
            let outcome = match this.drive(generation, &config).await {
                Some(success) => this.finish(generation, success).await,
                None => CycleOutcome::Cancelled,
            };
            let _ = done_tx.send(outcome);
        }));
        tracing::debug!(rooms = rooms.len(), "sync cycle started");
        Ok(done_rx)
    }

    /// Drain the room queues. `None` means the cycle was cancelled.
    async fn drive(&self, generation: u64, config: &SyncConfig) -> Option<bool> {
        let mut waiter = self.correlator.begin_sync();
        self.sessions.notify(RoomSyncEvent::SyncStarted);
        let mut drained = 0u32;

        loop {
            if let Err(e) = self.radio.transmit(OutboundFrame::sync_next()).await {
                tracing::warn!("sync transmit failed: {}", e);
                return self.is_generation(generation).then_some(false);
            }

            let signal = waiter.next(config.sync_timeout()).await;
            if !self.is_generation(generation) {
                return None;
            }

            match signal {
                Some(SyncSignal::Drained) => return Some(true),
                Some(SyncSignal::MoreQueued) => {
                    drained += 1;
                    if drained >= config.max_messages_per_cycle {
                        tracing::debug!(drained, "message cap reached, ending cycle");
                        return Some(true);
                    }
                }
                None => {
                    tracing::debug!(
                        timeout_secs = config.sync_timeout_secs,
                        "sync guard fired"
                    );
                    return Some(false);
                }
            }
        }
    }

    async fn finish(self: &Arc<Self>, generation: u64, success: bool) -> CycleOutcome {
        let rooms = self.sessions.record_sync_outcome(success).await;

        let config = self.config.get();
        let next = {
            let mut state = self.state();
            if state.generation != generation {
                return CycleOutcome::Cancelled;
            }
            state.in_flight = false;
            state.cycle = None;
            if success {
                state.backoff.on_success();
            } else {
                state.backoff.on_failure();
            }
            let next = state.backoff.current();
            if config.sync_enabled {
                self.schedule_locked(&mut state, next);
            }
            next
        };

        self.sessions
            .notify(RoomSyncEvent::SyncFinished { success, rooms });
        if success {
            tracing::debug!(rooms, next_secs = next.as_secs(), "sync cycle succeeded");
            CycleOutcome::Succeeded { rooms }
        } else {
            tracing::info!(rooms, next_secs = next.as_secs(), "sync cycle failed, backing off");
            CycleOutcome::Failed { rooms }
        }
    }

    fn is_generation(&self, generation: u64) -> bool {
        self.state().generation == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use roomsync_core::{opcode, PublicKey};
    use roomsync_store::MemoryStore;

    use crate::transport::memory::RecordingRadio;

    const NOW: i64 = 1_700_000_000_000;

    struct Harness {
        sessions: Arc<SessionTable<MemoryStore>>,
        correlator: Arc<Correlator>,
        radio: Arc<RecordingRadio>,
        scheduler: Arc<SyncScheduler<MemoryStore, RecordingRadio>>,
    }

    async fn harness_with(config: SyncConfig, rooms: &[u8]) -> Harness {
        let sessions = Arc::new(SessionTable::new(
            Arc::new(MemoryStore::new()),
            Arc::new(|| NOW),
        ));
        let epoch = sessions.link_up();
        for n in rooms {
            sessions
                .record_login_success(&PublicKey::from_bytes([*n; 32]), epoch)
                .await;
        }
        let correlator = Arc::new(Correlator::new());
        let radio = Arc::new(RecordingRadio::new());
        let scheduler = Arc::new(SyncScheduler::new(
            Arc::clone(&sessions),
            Arc::clone(&correlator),
            Arc::clone(&radio),
            ConfigHandle::new(config),
        ));
        Harness {
            sessions,
            correlator,
            radio,
            scheduler,
        }
    }

    async fn harness(rooms: &[u8]) -> Harness {
        harness_with(SyncConfig::default(), rooms).await
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(90), Duration::from_secs(600));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_secs(180));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_secs(360));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_secs(600));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_secs(600));
        backoff.on_success();
        assert_eq!(backoff.current(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failed_cycles_back_off() {
        let h = harness(&[1]).await;

        let mut intervals = Vec::new();
        for _ in 0..3 {
            let outcome = h.scheduler.run_cycle().await;
            assert_eq!(outcome, CycleOutcome::Failed { rooms: 1 });
            intervals.push(h.scheduler.current_interval().as_secs());
        }

        assert_eq!(intervals, vec![180, 360, 600]);
        let state = h.sessions.state(&PublicKey::from_bytes([1; 32]));
        assert_eq!(state.consecutive_failures, 3);
        assert!(!h.correlator.sync_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_interval() {
        let h = harness(&[1, 2]).await;
        assert_eq!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Failed { rooms: 2 }
        );

        let scheduler = Arc::clone(&h.scheduler);
        let cycle = tokio::spawn(async move { scheduler.run_cycle().await });
        h.radio.next_sent().await.unwrap();
        h.radio.next_sent().await.unwrap();
        h.correlator.on_frame(&[opcode::RESP_NO_MORE_MESSAGES]);

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Succeeded { rooms: 2 });
        assert_eq!(h.scheduler.current_interval(), Duration::from_secs(90));
        let state = h.sessions.state(&PublicKey::from_bytes([2; 32]));
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_successful_sync_at, Some(NOW));
        assert!(h.scheduler.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_loop_requests_each_message() {
        let h = harness(&[1]).await;

        let scheduler = Arc::clone(&h.scheduler);
        let cycle = tokio::spawn(async move { scheduler.run_cycle().await });

        for _ in 0..3 {
            h.radio.next_sent().await.unwrap();
            h.correlator.on_frame(&[opcode::RESP_CONTACT_MSG_RECV, 0xff]);
        }
        h.radio.next_sent().await.unwrap();
        h.correlator.on_frame(&[opcode::RESP_NO_MORE_MESSAGES]);

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Succeeded { rooms: 1 });
        assert_eq!(
            h.radio
                .sent_with_opcode(opcode::CMD_SYNC_NEXT_MESSAGE)
                .len(),
            4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_cap_ends_cycle() {
        let mut config = SyncConfig::default();
        config.max_messages_per_cycle = 2;
        let h = harness_with(config, &[1]).await;

        let scheduler = Arc::clone(&h.scheduler);
        let cycle = tokio::spawn(async move { scheduler.run_cycle().await });
        for _ in 0..2 {
            h.radio.next_sent().await.unwrap();
            h.correlator.on_frame(&[opcode::RESP_CHANNEL_MSG_RECV_V3, 0]);
        }

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Succeeded { rooms: 1 });
        assert_eq!(h.radio.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_without_sessions_resets_to_base() {
        let h = harness(&[]).await;
        assert_eq!(h.scheduler.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(h.scheduler.current_interval(), Duration::from_secs(90));
        assert!(h.scheduler.is_scheduled());
        assert!(h.radio.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_when_all_sessions_disabled() {
        let h = harness(&[1]).await;
        h.sessions
            .set_enabled(&PublicKey::from_bytes([1; 32]), false)
            .await;
        assert_eq!(h.scheduler.run_cycle().await, CycleOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feature_off_goes_idle() {
        let mut config = SyncConfig::default();
        config.sync_enabled = false;
        let h = harness_with(config, &[1]).await;

        h.scheduler.start();
        assert!(!h.scheduler.is_scheduled());
        assert_eq!(h.scheduler.run_cycle().await, CycleOutcome::Skipped);
        assert!(!h.scheduler.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_while_in_flight_is_noop() {
        let h = harness(&[1]).await;
        assert!(h.scheduler.trigger_now());
        h.radio.next_sent().await.unwrap();

        assert!(h.scheduler.is_in_flight());
        assert!(!h.scheduler.trigger_now());
        assert_eq!(h.scheduler.run_cycle().await, CycleOutcome::AlreadyInFlight);
        assert_eq!(h.radio.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_cycle() {
        let h = harness(&[1]).await;
        let scheduler = Arc::clone(&h.scheduler);
        let cycle = tokio::spawn(async move { scheduler.run_cycle().await });
        h.radio.next_sent().await.unwrap();

        h.scheduler.stop();

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Cancelled);
        assert!(!h.scheduler.is_in_flight());
        assert!(!h.scheduler.is_scheduled());
        tokio::time::sleep(Duration::from_secs(120)).await;
        let state = h.sessions.state(&PublicKey::from_bytes([1; 32]));
        assert_eq!(state.consecutive_failures, 0);
        assert!(!h.correlator.sync_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_base() {
        let h = harness(&[1]).await;
        h.scheduler.start();

        tokio::time::sleep(Duration::from_secs(89)).await;
        assert!(h.radio.sent().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.radio.sent().len(), 1);
        assert!(h.scheduler.is_in_flight());
    }

    proptest! {
        #[test]
        fn backoff_matches_closed_form(base in 1u64..600, extra in 0u64..3600, n in 0u32..20) {
            let max = base + extra;
            let mut backoff = Backoff::new(Duration::from_secs(base), Duration::from_secs(max));
            for _ in 0..n {
                backoff.on_failure();
            }
            let expected = base.saturating_mul(1u64 << n).min(max);
            prop_assert_eq!(backoff.current(), Duration::from_secs(expected));
        }
    }
}
