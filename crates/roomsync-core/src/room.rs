//! Per-room session record and derived status.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persisted room states, keyed by full public key hex.
pub type RoomStateMap = BTreeMap<String, RoomSessionState>;

/// Durable login/sync history of one room.
///
/// Timestamps are Unix milliseconds. `consecutive_failures` returns to 0 on
/// every successful login or sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSessionState {
    pub auto_sync_enabled: bool,
    pub last_login_attempt_at: Option<i64>,
    pub last_login_success_at: Option<i64>,
    pub last_successful_sync_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub consecutive_failures: u32,
}

impl Default for RoomSessionState {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            last_login_attempt_at: None,
            last_login_success_at: None,
            last_successful_sync_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
        }
    }
}

impl RoomSessionState {
    pub fn record_login_attempt(&mut self, now: i64) {
        self.last_login_attempt_at = Some(now);
    }

    pub fn record_login_success(&mut self, now: i64) {
        self.last_login_success_at = Some(now);
        self.consecutive_failures = 0;
    }

    pub fn record_sync_success(&mut self, now: i64) {
        self.last_successful_sync_at = Some(now);
        self.consecutive_failures = 0;
    }

    /// A failed login or sync.
    pub fn record_failure(&mut self, now: i64) {
        self.last_failure_at = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Whether the last successful sync is older than `stale_after`.
    ///
    /// A room that never synced is not stale, it is waiting.
    pub fn is_sync_stale(&self, now: i64, stale_after: Duration) -> bool {
        match self.last_successful_sync_at {
            Some(at) => {
                let limit = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
                now.saturating_sub(at) > limit
            }
            None => false,
        }
    }
}

/// What the UI shows for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    /// Room sync is switched off globally.
    Off,
    /// Auto-sync is disabled for this room.
    Disabled,
    /// A sync cycle is in flight.
    Syncing,
    /// Logged in, no successful sync yet.
    ConnectedWaiting,
    /// Logged in, last sync older than the stale threshold.
    ConnectedStale,
    /// Logged in and recently synced.
    ConnectedSynced,
    /// No session and the last attempt failed.
    NotLoggedIn,
    /// No session, nothing has failed.
    NotSynced,
}

/// Everything [`derive_status`] looks at.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub sync_enabled: bool,
    pub state: &'a RoomSessionState,
    pub sync_in_flight: bool,
    pub has_session: bool,
    pub now: i64,
    pub stale_after: Duration,
}

/// Derive a room's status. Checks are applied in priority order.
pub fn derive_status(inputs: StatusInputs<'_>) -> RoomStatus {
    let state = inputs.state;

    if !inputs.sync_enabled {
        return RoomStatus::Off;
    }
    if !state.auto_sync_enabled {
        return RoomStatus::Disabled;
    }
    if inputs.sync_in_flight {
        return RoomStatus::Syncing;
    }
    if inputs.has_session {
        return match state.last_successful_sync_at {
            None => RoomStatus::ConnectedWaiting,
            Some(_) if state.is_sync_stale(inputs.now, inputs.stale_after) => {
                RoomStatus::ConnectedStale
            }
            Some(_) => RoomStatus::ConnectedSynced,
        };
    }
    if state.last_failure_at.is_some() {
        return RoomStatus::NotLoggedIn;
    }
    RoomStatus::NotSynced
}
