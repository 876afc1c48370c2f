//! Route selection and timeout planning.
//!
//! A send is addressed by flood when no path is known, otherwise along the
//! node's direct or fixed path. The wait before declaring the send failed is
//! computed by a [`TimeoutPolicy`] from the hop count and payload size.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Maximum number of hops in a fixed path.
pub const MAX_PATH_LEN: usize = 64;

/// Payload sizes below this are treated as a full packet when estimating
/// airtime, so tiny control frames still get a sane wait.
pub const MTU_FLOOR_BYTES: usize = 184;

/// How a node is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingDescriptor {
    /// No known path; every send is a flood.
    Flood,
    /// Neighbour reachable with zero intermediate hops.
    Direct,
    /// Ordered relay hops, at most [`MAX_PATH_LEN`].
    Fixed(Vec<u8>),
}

impl RoutingDescriptor {
    /// Build a fixed path, rejecting paths longer than [`MAX_PATH_LEN`].
    ///
    /// An empty hop list is the direct route.
    pub fn fixed(hops: impl Into<Vec<u8>>) -> Result<Self> {
        let hops = hops.into();
        if hops.len() > MAX_PATH_LEN {
            return Err(CoreError::PathTooLong {
                len: hops.len(),
                max: MAX_PATH_LEN,
            });
        }
        if hops.is_empty() {
            return Ok(RoutingDescriptor::Direct);
        }
        Ok(RoutingDescriptor::Fixed(hops))
    }

    /// The relay hops of this route (empty for flood and direct).
    pub fn hops(&self) -> &[u8] {
        match self {
            RoutingDescriptor::Fixed(hops) => hops,
            _ => &[],
        }
    }
}

impl Default for RoutingDescriptor {
    fn default() -> Self {
        RoutingDescriptor::Flood
    }
}

/// How a send is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPlan {
    /// Broadcast discovery instead of a path.
    pub use_flood: bool,
    /// Number of hops, or [`SendPlan::UNKNOWN_HOPS`] for floods.
    pub hop_count: i32,
}

impl SendPlan {
    /// Hop count sentinel for flood sends.
    pub const UNKNOWN_HOPS: i32 = -1;
}

/// Select how to address a send to a node with the given routing.
pub fn plan_send(routing: &RoutingDescriptor) -> SendPlan {
    match routing {
        RoutingDescriptor::Flood => SendPlan {
            use_flood: true,
            hop_count: SendPlan::UNKNOWN_HOPS,
        },
        RoutingDescriptor::Direct => SendPlan {
            use_flood: false,
            hop_count: 0,
        },
        RoutingDescriptor::Fixed(hops) => SendPlan {
            use_flood: false,
            hop_count: hops.len() as i32,
        },
    }
}

/// Computes how long to wait for a response to a send.
///
/// Implementations must be non-decreasing in both `hop_count` (for known hop
/// counts) and `message_bytes`. A negative hop count means the send floods.
/// Closures of the same shape implement this trait.
pub trait TimeoutPolicy: Send + Sync {
    fn compute_timeout(&self, hop_count: i32, message_bytes: usize) -> Duration;
}

impl<F> TimeoutPolicy for F
where
    F: Fn(i32, usize) -> Duration + Send + Sync,
{
    fn compute_timeout(&self, hop_count: i32, message_bytes: usize) -> Duration {
        self(hop_count, message_bytes)
    }
}

/// Airtime-based timeout estimate.
///
/// - airtime = `max(bytes, MTU_FLOOR_BYTES) * airtime_per_byte`
/// - flood: `base + flood_factor * airtime`
/// - path: `base + (direct_factor * airtime + per_hop_overhead) * (hops + 1)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTimeoutPolicy {
    pub base_ms: u64,
    pub airtime_per_byte_ms: u64,
    pub flood_factor: u64,
    pub direct_factor: u64,
    pub per_hop_overhead_ms: u64,
}

impl Default for DefaultTimeoutPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            airtime_per_byte_ms: 4,
            flood_factor: 16,
            direct_factor: 6,
            per_hop_overhead_ms: 250,
        }
    }
}

impl DefaultTimeoutPolicy {
    fn airtime_ms(&self, message_bytes: usize) -> u64 {
        (message_bytes.max(MTU_FLOOR_BYTES) as u64).saturating_mul(self.airtime_per_byte_ms)
    }
}

impl TimeoutPolicy for DefaultTimeoutPolicy {
    fn compute_timeout(&self, hop_count: i32, message_bytes: usize) -> Duration {
        let airtime = self.airtime_ms(message_bytes);
        let ms = if hop_count < 0 {
            self.base_ms
                .saturating_add(self.flood_factor.saturating_mul(airtime))
        } else {
            let per_leg = self
                .direct_factor
                .saturating_mul(airtime)
                .saturating_add(self.per_hop_overhead_ms);
            self.base_ms
                .saturating_add(per_leg.saturating_mul(hop_count as u64 + 1))
        };
        Duration::from_millis(ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_flood() {
        let plan = plan_send(&RoutingDescriptor::Flood);
        assert!(plan.use_flood);
        assert_eq!(plan.hop_count, SendPlan::UNKNOWN_HOPS);
    }

    #[test]
    fn test_plan_direct_and_fixed() {
        assert_eq!(
            plan_send(&RoutingDescriptor::Direct),
            SendPlan {
                use_flood: false,
                hop_count: 0
            }
        );
        let fixed = RoutingDescriptor::fixed(vec![0x11, 0x22, 0x33]).unwrap();
        assert_eq!(plan_send(&fixed).hop_count, 3);
        assert!(!plan_send(&fixed).use_flood);
    }

    #[test]
    fn test_fixed_path_limits() {
        assert_eq!(
            RoutingDescriptor::fixed(Vec::new()).unwrap(),
            RoutingDescriptor::Direct
        );
        assert!(RoutingDescriptor::fixed(vec![0u8; MAX_PATH_LEN]).is_ok());
        assert!(matches!(
            RoutingDescriptor::fixed(vec![0u8; MAX_PATH_LEN + 1]),
            Err(CoreError::PathTooLong { len: 65, max: 64 })
        ));
    }

    #[test]
    fn test_small_frames_use_floor() {
        let policy = DefaultTimeoutPolicy::default();
        assert_eq!(
            policy.compute_timeout(0, 1),
            policy.compute_timeout(0, MTU_FLOOR_BYTES)
        );
        // 500 + (6 * 736 + 250) * 1
        assert_eq!(policy.compute_timeout(0, 1), Duration::from_millis(5166));
    }

    #[test]
    fn test_flood_waits_longer_than_direct() {
        let policy = DefaultTimeoutPolicy::default();
        assert!(policy.compute_timeout(-1, 64) > policy.compute_timeout(0, 64));
    }

    #[test]
    fn test_closure_policy() {
        let policy = |hops: i32, _bytes: usize| Duration::from_secs(hops.max(0) as u64 + 1);
        assert_eq!(policy.compute_timeout(2, 10), Duration::from_secs(3));
    }

    proptest! {
        #[test]
        fn timeout_monotonic_in_hops(hops in 0i32..64, bytes in 0usize..512) {
            let policy = DefaultTimeoutPolicy::default();
            prop_assert!(
                policy.compute_timeout(hops + 1, bytes) >= policy.compute_timeout(hops, bytes)
            );
        }

        #[test]
        fn timeout_monotonic_in_bytes(hops in -1i32..64, bytes in 0usize..512) {
            let policy = DefaultTimeoutPolicy::default();
            prop_assert!(
                policy.compute_timeout(hops, bytes + 1) >= policy.compute_timeout(hops, bytes)
            );
        }

        #[test]
        fn timeout_never_zero(hops in -1i32..=64, bytes in 0usize..4096) {
            let policy = DefaultTimeoutPolicy::default();
            prop_assert!(policy.compute_timeout(hops, bytes) > Duration::ZERO);
        }
    }
}
