//! Node identity types.
//!
//! Identifiers are newtypes so a full key can never be passed where a
//! correlation prefix is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Length of a node public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of the key prefix echoed in login result frames.
pub const PREFIX_LEN: usize = 6;

/// A 32-byte node public key. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Lowercase hex of the full key. This is the key of the persisted maps.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        Self::try_from(bytes.as_slice())
    }

    /// The wire-level correlation prefix of this key.
    pub fn prefix(&self) -> NodePrefix {
        let mut arr = [0u8; PREFIX_LEN];
        arr.copy_from_slice(&self.0[..PREFIX_LEN]);
        NodePrefix(arr)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl From<[u8; PUBLIC_KEY_LEN]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_LEN] =
            slice.try_into().map_err(|_| CoreError::InvalidKeyLength {
                expected: PUBLIC_KEY_LEN,
                got: slice.len(),
            })?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

/// The first [`PREFIX_LEN`] bytes of a public key.
///
/// Result frames echo only this prefix, so two nodes sharing a prefix are
/// indistinguishable on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePrefix(pub [u8; PREFIX_LEN]);

impl NodePrefix {
    /// Read a prefix from `frame` at `offset`, if the frame is long enough.
    pub fn read_at(frame: &[u8], offset: usize) -> Option<Self> {
        let bytes = frame.get(offset..offset + PREFIX_LEN)?;
        let mut arr = [0u8; PREFIX_LEN];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    /// Lowercase hex form, as used for correlation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for NodePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePrefix({})", self.to_hex())
    }
}

impl fmt::Display for NodePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_hex_roundtrip() {
        let key = PublicKey::from_bytes([0x42; 32]);
        let recovered = PublicKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, recovered);
    }

    #[test]
    fn test_public_key_serializes_as_hex() {
        let key = PublicKey::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), key);
        assert!(serde_json::from_str::<PublicKey>("\"abcd\"").is_err());
    }

    #[test]
    fn test_public_key_rejects_short_input() {
        let err = PublicKey::from_hex("aabbcc").unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidKeyLength { expected: 32, got: 3 }
        ));
    }

    #[test]
    fn test_prefix_is_first_six_bytes() {
        let mut bytes = [0u8; 32];
        bytes[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        bytes[6] = 0x11;
        let key = PublicKey::from_bytes(bytes);
        assert_eq!(key.prefix().to_hex(), "aabbccddeeff");
    }

    #[test]
    fn test_prefix_read_at_bounds() {
        let frame = [0x85, 0x00, 1, 2, 3, 4, 5, 6];
        assert_eq!(
            NodePrefix::read_at(&frame, 2),
            Some(NodePrefix([1, 2, 3, 4, 5, 6]))
        );
        assert_eq!(NodePrefix::read_at(&frame[..7], 2), None);
    }

    #[test]
    fn test_display_is_short() {
        let key = PublicKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", key), "abababababab");
        assert!(format!("{:?}", key).starts_with("PublicKey("));
    }
}
