//! Matches asynchronous radio frames to the operations waiting for them.
//!
//! Two kinds of waiters exist:
//!
//! - **Login waiters**, keyed by the 6-byte prefix of the room's key. Login
//!   result frames only echo the prefix, so the table maps prefix to a
//!   single-resolution channel.
//! - **The sync slot**, at most one, held by the in-flight sync cycle.
//!
//! Both are released by drop guards, so no entry outlives the call that
//! created it, whether it resolved, timed out or was cancelled.
//!
//! Two rooms sharing a prefix cannot be told apart. A second registration for
//! a prefix replaces the first; the first then times out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use roomsync_core::{InboundFrame, NodePrefix};

/// What [`Correlator::on_frame`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// A login waiter was resolved.
    LoginResolved { prefix: NodePrefix, success: bool },
    /// A login result arrived with nobody waiting for it.
    LoginUnmatched { prefix: NodePrefix },
    /// The in-flight cycle was told the queue is empty.
    SyncDrained,
    /// The in-flight cycle was told another message arrived.
    SyncMoreQueued,
    /// A sync frame arrived with no cycle in flight.
    SyncIdle,
    /// The radio announced waiting messages.
    MessageWaiting,
    /// Not for this component, or malformed.
    Ignored,
}

/// Progress reported to the in-flight sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// The room reported no more queued messages.
    Drained,
    /// A queued message was delivered; more may follow.
    MoreQueued,
}

struct PendingLogin {
    id: u64,
    tx: oneshot::Sender<bool>,
}

struct SyncSlot {
    id: u64,
    tx: mpsc::UnboundedSender<SyncSignal>,
}

/// The correlation tables.
#[derive(Default)]
pub struct Correlator {
    logins: Mutex<HashMap<NodePrefix, PendingLogin>>,
    sync: Mutex<Option<SyncSlot>>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn logins(&self) -> MutexGuard<'_, HashMap<NodePrefix, PendingLogin>> {
        self.logins.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sync_slot(&self) -> MutexGuard<'_, Option<SyncSlot>> {
        self.sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatch one inbound frame. Never fails.
    pub fn on_frame(&self, frame: &[u8]) -> FrameDisposition {
        match InboundFrame::decode(frame) {
            InboundFrame::LoginResult { prefix, success } => {
                let pending = self.logins().remove(&prefix);
                match pending {
                    Some(pending) => {
                        // The receiver may have just timed out; that is fine.
                        let _ = pending.tx.send(success);
                        tracing::debug!(%prefix, success, "login result matched");
                        FrameDisposition::LoginResolved { prefix, success }
                    }
                    None => {
                        tracing::debug!(%prefix, success, "login result with no waiter");
                        FrameDisposition::LoginUnmatched { prefix }
                    }
                }
            }
            InboundFrame::NoMoreMessages => self.signal_sync(SyncSignal::Drained),
            InboundFrame::QueuedMessage => self.signal_sync(SyncSignal::MoreQueued),
            InboundFrame::MessageWaiting => FrameDisposition::MessageWaiting,
            InboundFrame::TruncatedLoginResult | InboundFrame::Other(_) | InboundFrame::Empty => {
                FrameDisposition::Ignored
            }
        }
    }

    fn signal_sync(&self, signal: SyncSignal) -> FrameDisposition {
        let slot = self.sync_slot();
        match slot.as_ref() {
            Some(slot) if slot.tx.send(signal).is_ok() => match signal {
                SyncSignal::Drained => FrameDisposition::SyncDrained,
                SyncSignal::MoreQueued => FrameDisposition::SyncMoreQueued,
            },
            _ => FrameDisposition::SyncIdle,
        }
    }

    /// Register a login waiter for `prefix`.
    ///
    /// The entry is removed when the returned waiter is dropped.
    pub fn register_login(&self, prefix: NodePrefix) -> LoginWaiter<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if self
            .logins()
            .insert(prefix, PendingLogin { id, tx })
            .is_some()
        {
            tracing::debug!(%prefix, "replaced login waiter with shared prefix");
        }

        LoginWaiter {
            correlator: self,
            prefix,
            id,
            rx,
        }
    }

    /// Claim the sync slot for a new cycle, replacing any stale holder.
    pub fn begin_sync(&self) -> SyncWaiter<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sync_slot() = Some(SyncSlot { id, tx });

        SyncWaiter {
            correlator: self,
            id,
            rx,
        }
    }

    /// Whether a sync cycle holds the slot.
    pub fn sync_pending(&self) -> bool {
        self.sync_slot().is_some()
    }

    /// Number of registered login waiters.
    pub fn pending_logins(&self) -> usize {
        self.logins().len()
    }

    /// Whether a login waiter exists for `prefix`.
    pub fn has_login_waiter(&self, prefix: &NodePrefix) -> bool {
        self.logins().contains_key(prefix)
    }

    /// Drop every waiter. Blocked waiters resolve as failed.
    pub fn clear(&self) {
        self.logins().clear();
        self.sync_slot().take();
    }
}

/// A pending login registered under a prefix.
pub struct LoginWaiter<'a> {
    correlator: &'a Correlator,
    prefix: NodePrefix,
    id: u64,
    rx: oneshot::Receiver<bool>,
}

impl LoginWaiter<'_> {
    pub fn prefix(&self) -> NodePrefix {
        self.prefix
    }

    /// Wait for the login result. Timeout or cancellation yields `false`.
    pub async fn wait(&mut self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, &mut self.rx).await, Ok(Ok(true)))
    }
}

impl Drop for LoginWaiter<'_> {
    fn drop(&mut self) {
        let mut logins = self.correlator.logins();
        if logins.get(&self.prefix).map(|p| p.id) == Some(self.id) {
            logins.remove(&self.prefix);
        }
    }
}

/// The in-flight cycle's view of the sync slot.
pub struct SyncWaiter<'a> {
    correlator: &'a Correlator,
    id: u64,
    rx: mpsc::UnboundedReceiver<SyncSignal>,
}

impl SyncWaiter<'_> {
    /// Wait for the next signal. `None` on timeout or when the slot was
    /// cleared.
    pub async fn next(&mut self, timeout: Duration) -> Option<SyncSignal> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for SyncWaiter<'_> {
    fn drop(&mut self) {
        let mut slot = self.correlator.sync_slot();
        if slot.as_ref().map(|s| s.id) == Some(self.id) {
            slot.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use roomsync_core::opcode;

    const PREFIX: NodePrefix = NodePrefix([0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03]);

    fn login_frame(success: bool, prefix: NodePrefix) -> Vec<u8> {
        let code = if success {
            opcode::PUSH_LOGIN_SUCCESS
        } else {
            opcode::PUSH_LOGIN_FAIL
        };
        let mut frame = vec![code, 0x00];
        frame.extend_from_slice(&prefix.0);
        frame
    }

    #[tokio::test]
    async fn test_login_success_resolves_waiter() {
        let correlator = Correlator::new();
        let mut waiter = correlator.register_login(PREFIX);

        assert_eq!(
            correlator.on_frame(&login_frame(true, PREFIX)),
            FrameDisposition::LoginResolved {
                prefix: PREFIX,
                success: true
            }
        );
        assert!(waiter.wait(Duration::from_secs(1)).await);
        drop(waiter);
        assert_eq!(correlator.pending_logins(), 0);
    }

    #[tokio::test]
    async fn test_login_fail_resolves_false() {
        let correlator = Correlator::new();
        let mut waiter = correlator.register_login(PREFIX);
        correlator.on_frame(&login_frame(false, PREFIX));
        assert!(!waiter.wait(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_is_dropped() {
        let correlator = Correlator::new();
        {
            let mut waiter = correlator.register_login(PREFIX);
            assert!(!waiter.wait(Duration::from_secs(12)).await);
        }
        assert_eq!(correlator.pending_logins(), 0);

        assert_eq!(
            correlator.on_frame(&login_frame(true, PREFIX)),
            FrameDisposition::LoginUnmatched { prefix: PREFIX }
        );
        assert_eq!(correlator.pending_logins(), 0);
    }

    #[test]
    fn test_short_login_frame_is_ignored() {
        let correlator = Correlator::new();
        let _waiter = correlator.register_login(PREFIX);
        let frame = login_frame(true, PREFIX);

        assert_eq!(correlator.on_frame(&frame[..7]), FrameDisposition::Ignored);
        assert!(correlator.has_login_waiter(&PREFIX));
    }

    #[test]
    fn test_garbage_frames_are_ignored() {
        let correlator = Correlator::new();
        assert_eq!(correlator.on_frame(&[]), FrameDisposition::Ignored);
        assert_eq!(correlator.on_frame(&[0x42, 1, 2]), FrameDisposition::Ignored);
    }

    #[test]
    fn test_shared_prefix_replaces_earlier_waiter() {
        let correlator = Correlator::new();
        let first = correlator.register_login(PREFIX);
        let second = correlator.register_login(PREFIX);
        assert_eq!(correlator.pending_logins(), 1);

        // Dropping the replaced waiter must not remove the newer entry.
        drop(first);
        assert!(correlator.has_login_waiter(&PREFIX));
        drop(second);
        assert!(!correlator.has_login_waiter(&PREFIX));
    }

    #[tokio::test]
    async fn test_sync_frames_without_cycle() {
        let correlator = Correlator::new();
        assert_eq!(
            correlator.on_frame(&[opcode::RESP_NO_MORE_MESSAGES]),
            FrameDisposition::SyncIdle
        );
        assert_eq!(
            correlator.on_frame(&[opcode::RESP_CONTACT_MSG_RECV_V3, 0]),
            FrameDisposition::SyncIdle
        );
    }

    #[tokio::test]
    async fn test_sync_signals_reach_cycle() {
        let correlator = Correlator::new();
        let mut waiter = correlator.begin_sync();
        assert!(correlator.sync_pending());

        correlator.on_frame(&[opcode::RESP_CHANNEL_MSG_RECV, 1]);
        correlator.on_frame(&[opcode::RESP_NO_MORE_MESSAGES]);

        let t = Duration::from_secs(1);
        assert_eq!(waiter.next(t).await, Some(SyncSignal::MoreQueued));
        assert_eq!(waiter.next(t).await, Some(SyncSignal::Drained));

        drop(waiter);
        assert!(!correlator.sync_pending());
    }

    #[tokio::test]
    async fn test_clear_fails_blocked_waiters() {
        let correlator = Correlator::new();
        let mut login = correlator.register_login(PREFIX);
        let mut sync = correlator.begin_sync();

        correlator.clear();

        assert!(!login.wait(Duration::from_secs(30)).await);
        assert_eq!(sync.next(Duration::from_secs(30)).await, None);
        assert_eq!(correlator.pending_logins(), 0);
    }

    #[test]
    fn test_message_waiting() {
        let correlator = Correlator::new();
        assert_eq!(
            correlator.on_frame(&[opcode::PUSH_MSG_WAITING]),
            FrameDisposition::MessageWaiting
        );
    }

    proptest! {
        #[test]
        fn waiters_never_leak(events in proptest::collection::vec((0u8..4, any::<bool>()), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            rt.block_on(async {
                let correlator = Correlator::new();
                for (room, respond) in events {
                    let prefix = NodePrefix([room, 0, 0, 0, 0, 1]);
                    let mut waiter = correlator.register_login(prefix);
                    if respond {
                        correlator.on_frame(&login_frame(room % 2 == 0, prefix));
                    }
                    let _ = waiter.wait(Duration::from_secs(12)).await;
                    drop(waiter);
                    assert_eq!(correlator.pending_logins(), 0);
                }
            });
        }
    }
}
