//! Room login with bounded retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use roomsync_core::{plan_send, Contact, OutboundFrame, PublicKey, TimeoutPolicy};
use roomsync_store::Store;

use crate::config::{ConfigHandle, SyncConfig};
use crate::correlator::Correlator;
use crate::session::SessionTable;
use crate::transport::RadioTransport;

enum Attempt {
    Accepted,
    Rejected,
    /// The room was disabled or the link dropped; stop without recording.
    Abandoned,
}

/// Logs in to room nodes.
///
/// At most one login per room runs at a time. A concurrent second call for
/// the same room returns `false` immediately.
pub struct LoginManager<S: Store + ?Sized, T: RadioTransport + ?Sized> {
    sessions: Arc<SessionTable<S>>,
    correlator: Arc<Correlator>,
    radio: Arc<T>,
    policy: Arc<dyn TimeoutPolicy>,
    config: ConfigHandle,
    in_flight: Mutex<HashMap<PublicKey, u64>>,
    next_token: AtomicU64,
}

impl<S: Store + ?Sized, T: RadioTransport + ?Sized> LoginManager<S, T> {
    pub fn new(
        sessions: Arc<SessionTable<S>>,
        correlator: Arc<Correlator>,
        radio: Arc<T>,
        policy: Arc<dyn TimeoutPolicy>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            sessions,
            correlator,
            radio,
            policy,
            config,
            in_flight: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<PublicKey, u64>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self, key: &PublicKey) -> Option<InFlight<'_, S, T>> {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(key) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(*key, token);
        Some(InFlight {
            manager: self,
            key: *key,
            token,
        })
    }

    /// Whether a login for `key` is running.
    pub fn is_logging_in(&self, key: &PublicKey) -> bool {
        self.in_flight().contains_key(key)
    }

    /// Forget every in-flight claim. Used when the link drops and the login
    /// tasks are being aborted.
    pub fn cancel_all(&self) {
        self.in_flight().clear();
    }

    /// Log in to `room`, retrying up to the configured number of attempts.
    ///
    /// Returns whether a session was opened. Never fails: transmit errors and
    /// timeouts count as failed attempts.
    pub async fn login(&self, room: &Contact, password: &str) -> bool {
        let key = room.public_key;
        let Some(_claim) = self.claim(&key) else {
            tracing::debug!(room = %key, "login already in flight");
            return false;
        };
        let Some(epoch) = self.sessions.current_epoch() else {
            return false;
        };
        let config = self.config.get();

        for attempt in 1..=config.login_attempts {
            if attempt > 1 {
                tokio::select! {
                    () = tokio::time::sleep(config.login_retry_delay()) => {}
                    () = self.sessions.revoked(&key, epoch) => {
                        tracing::debug!(room = %key, "login abandoned before retry");
                        return false;
                    }
                }
            }

            match self.attempt(room, password, epoch, &config).await {
                Attempt::Accepted => {
                    let opened = self.sessions.record_login_success(&key, epoch).await;
                    if opened {
                        tracing::info!(room = %key, name = %room.name, attempt, "logged in to room");
                    }
                    return opened;
                }
                Attempt::Rejected => {
                    tracing::debug!(room = %key, attempt, "login attempt failed");
                }
                Attempt::Abandoned => {
                    tracing::debug!(room = %key, "login abandoned");
                    return false;
                }
            }
        }

        if self.sessions.record_login_failure(&key, epoch).await {
            tracing::warn!(
                room = %key,
                name = %room.name,
                attempts = config.login_attempts,
                "room login failed"
            );
        }
        false
    }

    async fn attempt(
        &self,
        room: &Contact,
        password: &str,
        epoch: u64,
        config: &SyncConfig,
    ) -> Attempt {
        let key = room.public_key;
        if !self.sessions.record_login_attempt(&key, epoch).await {
            return Attempt::Abandoned;
        }

        let plan = plan_send(&room.routing);
        let frame = OutboundFrame::login(&key, password, &room.routing);
        let mut timeout = self.policy.compute_timeout(plan.hop_count, frame.len());
        if timeout.is_zero() {
            timeout = config.login_fallback_timeout();
        }

        let mut waiter = self.correlator.register_login(key.prefix());
        if let Err(e) = self.radio.transmit(frame).await {
            tracing::warn!(room = %key, "login transmit failed: {}", e);
            return if self.sessions.may_proceed(&key, epoch) {
                Attempt::Rejected
            } else {
                Attempt::Abandoned
            };
        }

        // Disabling the room or losing the link drops the waiter right away
        // instead of letting it sit out the timeout.
        let accepted = tokio::select! {
            accepted = waiter.wait(timeout) => accepted,
            () = self.sessions.revoked(&key, epoch) => false,
        };
        drop(waiter);

        if !self.sessions.may_proceed(&key, epoch) {
            Attempt::Abandoned
        } else if accepted {
            Attempt::Accepted
        } else {
            Attempt::Rejected
        }
    }
}

/// Claim on a room's login slot, released on drop.
struct InFlight<'a, S: Store + ?Sized, T: RadioTransport + ?Sized> {
    manager: &'a LoginManager<S, T>,
    key: PublicKey,
    token: u64,
}

impl<S: Store + ?Sized, T: RadioTransport + ?Sized> Drop for InFlight<'_, S, T> {
    fn drop(&mut self) {
        let mut in_flight = self.manager.in_flight();
        if in_flight.get(&self.key) == Some(&self.token) {
            in_flight.remove(&self.key);
        }
    }
}
