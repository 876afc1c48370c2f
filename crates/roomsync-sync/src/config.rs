//! Room sync configuration.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Configuration for room login and sync behavior.
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Master switch for room sync.
    pub sync_enabled: bool,
    /// Log in to saved rooms when the radio connects.
    pub auto_login_enabled: bool,
    /// Interval between sync cycles after a success.
    pub base_interval_secs: u64,
    /// Ceiling for the backed-off interval.
    pub max_interval_secs: u64,
    /// How long one cycle waits for the room to report an empty queue.
    pub sync_timeout_secs: u64,
    /// A session whose last sync is older than this is stale.
    pub stale_after_minutes: u64,
    /// Full login attempts before giving up.
    pub login_attempts: u32,
    /// Pause between login attempts.
    pub login_retry_delay_ms: u64,
    /// Login wait used when the timeout policy yields nothing usable.
    pub login_fallback_timeout_secs: u64,
    /// How long the login sweep waits for the node directory.
    pub directory_wait_ms: u64,
    /// Messages drained in one cycle before it ends.
    pub max_messages_per_cycle: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            auto_login_enabled: true,
            base_interval_secs: 90,
            max_interval_secs: 600,
            sync_timeout_secs: 30,
            stale_after_minutes: 30,
            login_attempts: 3,
            login_retry_delay_ms: 2_000,
            login_fallback_timeout_secs: 12,
            directory_wait_ms: 5_000,
            max_messages_per_cycle: 64,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.base_interval_secs == 0 {
            return Err(SyncError::InvalidConfig("base interval must be > 0".into()));
        }
        if self.max_interval_secs < self.base_interval_secs {
            return Err(SyncError::InvalidConfig(format!(
                "max interval {}s is below base interval {}s",
                self.max_interval_secs, self.base_interval_secs
            )));
        }
        if self.sync_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig("sync timeout must be > 0".into()));
        }
        if self.login_attempts == 0 {
            return Err(SyncError::InvalidConfig("login attempts must be >= 1".into()));
        }
        if self.login_fallback_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "login fallback timeout must be > 0".into(),
            ));
        }
        if self.max_messages_per_cycle == 0 {
            return Err(SyncError::InvalidConfig(
                "max messages per cycle must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_minutes.saturating_mul(60))
    }

    pub fn login_retry_delay(&self) -> Duration {
        Duration::from_millis(self.login_retry_delay_ms)
    }

    pub fn login_fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.login_fallback_timeout_secs)
    }

    pub fn directory_wait(&self) -> Duration {
        Duration::from_millis(self.directory_wait_ms)
    }
}

/// Shared, replaceable configuration.
///
/// Readers take a snapshot with [`ConfigHandle::get`]; a cycle or login keeps
/// the snapshot it started with.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle(Arc<RwLock<SyncConfig>>);

impl ConfigHandle {
    pub fn new(config: SyncConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> SyncConfig {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration, returning the previous one.
    pub fn replace(&self, config: SyncConfig) -> SyncConfig {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, config)
    }
}
