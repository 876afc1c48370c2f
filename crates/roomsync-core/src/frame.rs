//! Companion radio frame codec.
//!
//! Frame boundaries are resolved by the transport; every frame handed to
//! [`InboundFrame::decode`] is one complete frame whose first byte is the
//! opcode. Only the opcodes the sync engine cares about are decoded, the rest
//! map to [`InboundFrame::Other`].
//!
//! ```text
//! login result:  [0x85|0x86][flags][prefix: 6 bytes][...]
//! no more msgs:  [0x0A]
//! login request: [0x1A][public key: 32 bytes][password: utf-8]
//! sync next:     [0x0A]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::routing::RoutingDescriptor;
use crate::types::{NodePrefix, PublicKey, PREFIX_LEN, PUBLIC_KEY_LEN};

/// Opcodes of the companion protocol.
pub mod opcode {
    /// Command: fetch the next queued message.
    pub const CMD_SYNC_NEXT_MESSAGE: u8 = 0x0A;
    /// Command: log in to a room or repeater.
    pub const CMD_SEND_LOGIN: u8 = 0x1A;

    /// Response: direct message delivered.
    pub const RESP_CONTACT_MSG_RECV: u8 = 0x07;
    /// Response: channel message delivered.
    pub const RESP_CHANNEL_MSG_RECV: u8 = 0x08;
    /// Response: the queue is empty.
    pub const RESP_NO_MORE_MESSAGES: u8 = 0x0A;
    /// Response: direct message delivered (v3 layout).
    pub const RESP_CONTACT_MSG_RECV_V3: u8 = 0x10;
    /// Response: channel message delivered (v3 layout).
    pub const RESP_CHANNEL_MSG_RECV_V3: u8 = 0x11;

    /// Push: the radio holds messages waiting to be fetched.
    pub const PUSH_MSG_WAITING: u8 = 0x83;
    /// Push: login accepted.
    pub const PUSH_LOGIN_SUCCESS: u8 = 0x85;
    /// Push: login rejected.
    pub const PUSH_LOGIN_FAIL: u8 = 0x86;

    /// Offset of the key prefix in login result frames.
    pub const LOGIN_PREFIX_OFFSET: usize = 2;
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Login result for the node with this prefix.
    LoginResult { prefix: NodePrefix, success: bool },
    /// A login result too short to carry a prefix.
    TruncatedLoginResult,
    /// The room has no more queued messages.
    NoMoreMessages,
    /// A queued message was delivered.
    QueuedMessage,
    /// The radio has messages waiting.
    MessageWaiting,
    /// Anything this crate does not interpret.
    Other(u8),
    /// Zero-length frame.
    Empty,
}

impl InboundFrame {
    /// Decode a frame by its leading opcode. Never fails.
    pub fn decode(frame: &[u8]) -> Self {
        let Some(&code) = frame.first() else {
            return InboundFrame::Empty;
        };

        match code {
            opcode::PUSH_LOGIN_SUCCESS | opcode::PUSH_LOGIN_FAIL => {
                match NodePrefix::read_at(frame, opcode::LOGIN_PREFIX_OFFSET) {
                    Some(prefix) => InboundFrame::LoginResult {
                        prefix,
                        success: code == opcode::PUSH_LOGIN_SUCCESS,
                    },
                    None => InboundFrame::TruncatedLoginResult,
                }
            }
            opcode::RESP_NO_MORE_MESSAGES => InboundFrame::NoMoreMessages,
            opcode::RESP_CONTACT_MSG_RECV
            | opcode::RESP_CHANNEL_MSG_RECV
            | opcode::RESP_CONTACT_MSG_RECV_V3
            | opcode::RESP_CHANNEL_MSG_RECV_V3 => InboundFrame::QueuedMessage,
            opcode::PUSH_MSG_WAITING => InboundFrame::MessageWaiting,
            other => InboundFrame::Other(other),
        }
    }
}

/// How the radio should address an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Local command to the companion radio, not addressed to a node.
    Local,
    /// Flood to discover the node.
    Flood,
    /// Along a known path. No hops means a direct neighbour.
    Path { hops: Vec<u8> },
}

impl From<&RoutingDescriptor> for Route {
    fn from(routing: &RoutingDescriptor) -> Self {
        match routing {
            RoutingDescriptor::Flood => Route::Flood,
            RoutingDescriptor::Direct | RoutingDescriptor::Fixed(_) => Route::Path {
                hops: routing.hops().to_vec(),
            },
        }
    }
}

/// A frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub route: Route,
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Login request for `room`, addressed along `routing`.
    pub fn login(room: &PublicKey, password: &str, routing: &RoutingDescriptor) -> Self {
        let mut buf = BytesMut::with_capacity(1 + PUBLIC_KEY_LEN + password.len());
        buf.put_u8(opcode::CMD_SEND_LOGIN);
        buf.put_slice(room.as_bytes());
        buf.put_slice(password.as_bytes());
        Self {
            route: routing.into(),
            payload: buf.freeze(),
        }
    }

    /// Request for the next queued message.
    pub fn sync_next() -> Self {
        Self {
            route: Route::Local,
            payload: Bytes::from_static(&[opcode::CMD_SYNC_NEXT_MESSAGE]),
        }
    }

    /// Opcode of this frame.
    pub fn opcode(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Target key of a login frame.
    pub fn login_target(&self) -> Option<PublicKey> {
        if self.opcode() != Some(opcode::CMD_SEND_LOGIN) {
            return None;
        }
        let bytes = self.payload.get(1..1 + PUBLIC_KEY_LEN)?;
        PublicKey::try_from(bytes).ok()
    }

    /// Size of the payload on air.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Minimum length of a login result frame that carries a prefix.
pub const LOGIN_RESULT_MIN_LEN: usize = opcode::LOGIN_PREFIX_OFFSET + PREFIX_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    fn login_result(code: u8, prefix: [u8; 6]) -> Vec<u8> {
        let mut frame = vec![code, 0x00];
        frame.extend_from_slice(&prefix);
        frame
    }

    #[test]
    fn test_decode_login_success() {
        let frame = login_result(opcode::PUSH_LOGIN_SUCCESS, [0xaa, 0xbb, 0xcc, 1, 2, 3]);
        assert_eq!(
            InboundFrame::decode(&frame),
            InboundFrame::LoginResult {
                prefix: NodePrefix([0xaa, 0xbb, 0xcc, 1, 2, 3]),
                success: true,
            }
        );
    }

    #[test]
    fn test_decode_login_fail() {
        let frame = login_result(opcode::PUSH_LOGIN_FAIL, [9; 6]);
        assert!(matches!(
            InboundFrame::decode(&frame),
            InboundFrame::LoginResult { success: false, .. }
        ));
    }

    #[test]
    fn test_decode_short_login_result() {
        let frame = login_result(opcode::PUSH_LOGIN_SUCCESS, [1; 6]);
        assert_eq!(
            InboundFrame::decode(&frame[..LOGIN_RESULT_MIN_LEN - 1]),
            InboundFrame::TruncatedLoginResult
        );
    }

    #[test]
    fn test_decode_sync_frames() {
        assert_eq!(InboundFrame::decode(&[0x0A]), InboundFrame::NoMoreMessages);
        assert_eq!(
            InboundFrame::decode(&[0x10, 1, 2, 3]),
            InboundFrame::QueuedMessage
        );
        assert_eq!(InboundFrame::decode(&[0x83]), InboundFrame::MessageWaiting);
        assert_eq!(InboundFrame::decode(&[0x42]), InboundFrame::Other(0x42));
        assert_eq!(InboundFrame::decode(&[]), InboundFrame::Empty);
    }

    #[test]
    fn test_encode_login() {
        let room = PublicKey::from_bytes([0x5a; 32]);
        let routing = RoutingDescriptor::fixed([7, 9]).unwrap();
        let frame = OutboundFrame::login(&room, "hunter2", &routing);

        assert_eq!(frame.opcode(), Some(opcode::CMD_SEND_LOGIN));
        assert_eq!(frame.len(), 1 + 32 + 7);
        assert_eq!(&frame.payload[33..], b"hunter2");
        assert_eq!(frame.route, Route::Path { hops: vec![7, 9] });
        assert_eq!(frame.login_target(), Some(room));
    }

    #[test]
    fn test_routes_follow_routing() {
        assert_eq!(Route::from(&RoutingDescriptor::Flood), Route::Flood);
        assert_eq!(
            Route::from(&RoutingDescriptor::Direct),
            Route::Path { hops: Vec::new() }
        );
    }

    #[test]
    fn test_sync_next_is_local() {
        let frame = OutboundFrame::sync_next();
        assert_eq!(frame.route, Route::Local);
        assert_eq!(frame.opcode(), Some(opcode::CMD_SYNC_NEXT_MESSAGE));
        assert_eq!(frame.login_target(), None);
    }
}
