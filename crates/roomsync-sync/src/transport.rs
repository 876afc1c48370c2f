//! Transport abstraction for the companion radio link.
//!
//! The transport owns the physical link (BLE, serial, TCP). It reports link
//! state and complete inbound frames as [`TransportEvent`]s and accepts
//! outbound frames through [`RadioTransport::transmit`]. The link carries one
//! request at a time; mutual exclusion on the wire is the transport's job.

use async_trait::async_trait;
use bytes::Bytes;

use roomsync_core::OutboundFrame;

use crate::error::Result;

/// Something that happened on the radio link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// One complete inbound frame.
    Frame(Bytes),
}

/// Transport trait for sending frames to the companion radio.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Hand a frame to the radio. May fail if the link is down or busy.
    async fn transmit(&self, frame: OutboundFrame) -> Result<()>;
}

/// A recording transport for testing.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::error::SyncError;

    /// Records every transmitted frame and optionally fails transmits.
    pub struct RecordingRadio {
        sent: Mutex<Vec<OutboundFrame>>,
        tx: mpsc::UnboundedSender<OutboundFrame>,
        rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundFrame>>,
        failing: AtomicBool,
    }

    impl RecordingRadio {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                sent: Mutex::new(Vec::new()),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                failing: AtomicBool::new(false),
            }
        }

        /// Make subsequent transmits fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Every frame transmitted so far.
        pub fn sent(&self) -> Vec<OutboundFrame> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        /// Frames transmitted with the given opcode.
        pub fn sent_with_opcode(&self, code: u8) -> Vec<OutboundFrame> {
            self.sent()
                .into_iter()
                .filter(|f| f.opcode() == Some(code))
                .collect()
        }

        /// Wait for the next transmitted frame.
        pub async fn next_sent(&self) -> Option<OutboundFrame> {
            self.rx.lock().await.recv().await
        }
    }

    impl Default for RecordingRadio {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RadioTransport for RecordingRadio {
        async fn transmit(&self, frame: OutboundFrame) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Transport("radio busy".into()));
            }
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(frame.clone());
            let _ = self.tx.send(frame);
            Ok(())
        }
    }
}
