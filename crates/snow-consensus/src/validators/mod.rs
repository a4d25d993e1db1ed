//! Weighted validator sets and the per-subnet manager.

mod manager;
mod set;

use serde::{Deserialize, Serialize};
use snow_ids::NodeId;

pub use manager::Manager;
pub use set::Set;

/// A validator in the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub node_id: NodeId,
    /// Opaque public key bytes
    pub public_key: Vec<u8>,
    /// Stake weight, never zero while the validator is a member
    pub weight: u64,
}

/// Observer of validator set changes.
///
/// Callbacks run in mutation order. They may read the set but must not mutate it.
pub trait SetCallbackListener: Send + Sync {
    fn on_validator_added(&self, node_id: NodeId, public_key: &[u8], weight: u64);

    fn on_validator_removed(&self, node_id: NodeId, weight: u64);

    fn on_validator_weight_changed(&self, node_id: NodeId, old_weight: u64, new_weight: u64);
}
