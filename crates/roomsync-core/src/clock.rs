//! Wall-clock source for state timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies Unix-millisecond timestamps.
///
/// Closures returning `i64` are clocks too, which keeps test clocks small.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_millis(&self) -> i64 {
        self()
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_clock() {
        let now = Arc::new(AtomicI64::new(5));
        let handle = Arc::clone(&now);
        let clock: Arc<dyn Clock> = Arc::new(move || handle.load(Ordering::SeqCst));

        assert_eq!(clock.now_millis(), 5);
        now.store(9, Ordering::SeqCst);
        assert_eq!(clock.now_millis(), 9);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
