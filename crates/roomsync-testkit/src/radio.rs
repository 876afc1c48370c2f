//! A radio that answers like a companion device would.
//!
//! Replies are pushed back through the same event channel the service is
//! attached to, so they travel the real dispatch path.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use roomsync_core::{opcode, OutboundFrame, PublicKey};
use roomsync_sync::{RadioTransport, SyncError, TransportEvent};

use crate::fixtures::frames;

/// How a room answers a login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Accept,
    Reject,
    /// Never answers; the attempt times out.
    Silent,
}

/// How the radio answers a sync-next request once the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReply {
    /// Reports no more messages.
    Drain,
    /// Never answers; the cycle guard fires.
    Silent,
}

struct Script {
    logins: HashMap<PublicKey, LoginReply>,
    sync: SyncReply,
    queued: usize,
    failing: bool,
    sent: Vec<OutboundFrame>,
}

/// Scripted companion radio.
pub struct ScriptedRadio {
    events: mpsc::Sender<TransportEvent>,
    script: Mutex<Script>,
}

impl ScriptedRadio {
    /// A radio replying on `events`. Rooms accept logins and queues are
    /// empty until scripted otherwise.
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            events,
            script: Mutex::new(Script {
                logins: HashMap::new(),
                sync: SyncReply::Drain,
                queued: 0,
                failing: false,
                sent: Vec::new(),
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_login_reply(&self, room: PublicKey, reply: LoginReply) {
        self.script().logins.insert(room, reply);
    }

    pub fn set_sync_reply(&self, reply: SyncReply) {
        self.script().sync = reply;
    }

    /// Queue `count` more messages to be drained.
    pub fn queue_messages(&self, count: usize) {
        self.script().queued += count;
    }

    pub fn queued(&self) -> usize {
        self.script().queued
    }

    /// Fail every transmit while set.
    pub fn set_failing(&self, failing: bool) {
        self.script().failing = failing;
    }

    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.script().sent.clone()
    }

    /// Login requests sent to `room`.
    pub fn login_attempts(&self, room: &PublicKey) -> usize {
        self.script()
            .sent
            .iter()
            .filter(|frame| frame.login_target().as_ref() == Some(room))
            .count()
    }

    /// Login requests in the order they were sent.
    pub fn login_order(&self) -> Vec<PublicKey> {
        self.script()
            .sent
            .iter()
            .filter_map(OutboundFrame::login_target)
            .collect()
    }

    pub fn sync_requests(&self) -> usize {
        self.script()
            .sent
            .iter()
            .filter(|frame| frame.opcode() == Some(opcode::CMD_SYNC_NEXT_MESSAGE))
            .count()
    }

    fn reply(&self, frame: bytes::Bytes) {
        // A full channel or a detached service just loses the reply, like
        // a radio out of range would.
        let _ = self.events.try_send(TransportEvent::Frame(frame));
    }
}

#[async_trait]
impl RadioTransport for ScriptedRadio {
    async fn transmit(&self, frame: OutboundFrame) -> roomsync_sync::Result<()> {
        let reply = {
            let mut script = self.script();
            if script.failing {
                return Err(SyncError::Transport("scripted failure".into()));
            }
            script.sent.push(frame.clone());

            if let Some(room) = frame.login_target() {
                match script
                    .logins
                    .get(&room)
                    .copied()
                    .unwrap_or(LoginReply::Accept)
                {
                    LoginReply::Accept => Some(frames::login_success(&room)),
                    LoginReply::Reject => Some(frames::login_fail(&room)),
                    LoginReply::Silent => None,
                }
            } else if frame.opcode() == Some(opcode::CMD_SYNC_NEXT_MESSAGE) {
                if script.queued > 0 {
                    script.queued -= 1;
                    Some(frames::queued_message())
                } else if script.sync == SyncReply::Drain {
                    Some(frames::no_more_messages())
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(reply) = reply {
            self.reply(reply);
        }
        Ok(())
    }
}
