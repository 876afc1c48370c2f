//! Proptest generators for property-based testing.

use proptest::prelude::*;

use roomsync_core::{PublicKey, RoomSessionState, RoutingDescriptor, MAX_PATH_LEN};
use roomsync_sync::SyncConfig;

/// Generate a random PublicKey.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    any::<[u8; 32]>().prop_map(PublicKey::from_bytes)
}

/// Generate a valid routing descriptor.
pub fn routing_descriptor() -> impl Strategy<Value = RoutingDescriptor> {
    prop_oneof![
        Just(RoutingDescriptor::Flood),
        Just(RoutingDescriptor::Direct),
        prop::collection::vec(any::<u8>(), 1..=MAX_PATH_LEN).prop_map(RoutingDescriptor::Fixed),
    ]
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    1_500_000_000_000i64..2_000_000_000_000
}

/// Generate a room session state.
pub fn room_session_state() -> impl Strategy<Value = RoomSessionState> {
    (
        any::<bool>(),
        proptest::option::of(timestamp()),
        proptest::option::of(timestamp()),
        proptest::option::of(timestamp()),
        proptest::option::of(timestamp()),
        0u32..20,
    )
        .prop_map(
            |(enabled, attempt, login, sync, failure, failures)| RoomSessionState {
                auto_sync_enabled: enabled,
                last_login_attempt_at: attempt,
                last_login_success_at: login,
                last_successful_sync_at: sync,
                last_failure_at: failure,
                consecutive_failures: failures,
            },
        )
}

/// Generate a configuration that passes validation.
pub fn sync_config() -> impl Strategy<Value = SyncConfig> {
    (1u64..600, 0u64..3600, 1u64..120, 1u32..6, 1u32..128).prop_map(
        |(base, extra, timeout, attempts, cap)| SyncConfig {
            base_interval_secs: base,
            max_interval_secs: base + extra,
            sync_timeout_secs: timeout,
            login_attempts: attempts,
            max_messages_per_cycle: cap,
            ..SyncConfig::default()
        },
    )
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}
