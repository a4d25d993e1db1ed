//! Identifier types for the snow consensus engine.
//!
//! - [`Id`]: a 32-byte identifier for containers, chains and subnets
//! - [`NodeId`]: a 20-byte identifier for validators
//!
//! Both render as CB58 (Base58 with a 4-byte checksum).

mod cb58;
mod hashing;
mod id;
mod node_id;

pub use cb58::{decode_cb58, encode_cb58, Cb58Error};
pub use hashing::{checksum, compute_hash256, Hash256};
pub use id::{Id, IdError};
pub use node_id::{NodeId, NodeIdError, NODE_ID_PREFIX};

/// Length of an [`Id`] in bytes.
pub const ID_LEN: usize = 32;

/// Length of a [`NodeId`] in bytes.
pub const NODE_ID_LEN: usize = 20;
