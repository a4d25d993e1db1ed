//! 20-byte validator identifier.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::cb58::{decode_cb58, encode_cb58, Cb58Error};
use crate::NODE_ID_LEN;

/// Prefix of the text form of a [`NodeId`].
pub const NODE_ID_PREFIX: &str = "NodeID-";

/// Identifies a validator.
///
/// Displayed as `NodeID-` followed by the CB58 encoding of the bytes.
/// Ordering is bytewise; validator sets rely on it for deterministic sampling.
///
/// ```
/// use snow_ids::NodeId;
///
/// let id = NodeId::from_bytes([0u8; 20]);
/// assert!(id.to_string().starts_with("NodeID-"));
/// assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId([u8; NODE_ID_LEN]);

/// Errors returned when parsing a [`NodeId`].
#[derive(Debug, Error)]
pub enum NodeIdError {
    #[error("cb58 decoding failed: {0}")]
    Cb58(#[from] Cb58Error),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("missing NodeID- prefix")]
    MissingPrefix,
}

impl NodeId {
    pub const EMPTY: Self = Self([0u8; NODE_ID_LEN]);

    #[must_use]
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// # Errors
    ///
    /// Returns [`NodeIdError::InvalidLength`] unless `bytes` is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, NodeIdError> {
        let arr: [u8; NODE_ID_LEN] =
            bytes.try_into().map_err(|_| NodeIdError::InvalidLength {
                expected: NODE_ID_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; NODE_ID_LEN]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_ID_PREFIX}{}", encode_cb58(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(NODE_ID_PREFIX)
            .ok_or(NodeIdError::MissingPrefix)?;
        Self::from_slice(&decode_cb58(encoded)?)
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
