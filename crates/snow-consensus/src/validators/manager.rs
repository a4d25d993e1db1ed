use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use snow_ids::{Id, NodeId};
use snow_utils::Bag;

use super::{Set, Validator};
use crate::{ConsensusError, Result};

/// Validator sets keyed by subnet.
///
/// Subnets are registered explicitly; operations on an unknown subnet fail
/// with `SubnetNotFound` instead of creating an empty set. The manager lock
/// only guards the subnet map, so stake changes within one subnet never wait
/// on another.
#[derive(Debug, Default)]
pub struct Manager {
    subnets: RwLock<HashMap<Id, Arc<Set>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the validator set of a subnet.
    pub fn add(&self, subnet_id: Id, set: Arc<Set>) -> Result<()> {
        let mut subnets = self.subnets.write();
        if subnets.contains_key(&subnet_id) {
            return Err(ConsensusError::SubnetExists(subnet_id));
        }
        subnets.insert(subnet_id, set);
        Ok(())
    }

    /// Unregisters a subnet, returning its set.
    pub fn remove(&self, subnet_id: Id) -> Result<Arc<Set>> {
        self.subnets
            .write()
            .remove(&subnet_id)
            .ok_or(ConsensusError::SubnetNotFound(subnet_id))
    }

    pub fn get(&self, subnet_id: Id) -> Option<Arc<Set>> {
        self.subnets.read().get(&subnet_id).cloned()
    }

    pub fn contains(&self, subnet_id: Id) -> bool {
        self.subnets.read().contains_key(&subnet_id)
    }

    /// Number of registered subnets.
    pub fn count(&self) -> usize {
        self.subnets.read().len()
    }

    fn subnet(&self, subnet_id: Id) -> Result<Arc<Set>> {
        self.get(subnet_id)
            .ok_or(ConsensusError::SubnetNotFound(subnet_id))
    }

    pub fn add_staker(
        &self,
        subnet_id: Id,
        node_id: NodeId,
        public_key: Vec<u8>,
        weight: u64,
    ) -> Result<()> {
        self.subnet(subnet_id)?.add(node_id, public_key, weight)
    }

    pub fn add_weight(&self, subnet_id: Id, node_id: NodeId, weight: u64) -> Result<()> {
        self.subnet(subnet_id)?.add_weight(node_id, weight)
    }

    pub fn remove_weight(&self, subnet_id: Id, node_id: NodeId, weight: u64) -> Result<()> {
        self.subnet(subnet_id)?.remove_weight(node_id, weight)
    }

    pub fn get_weight(&self, subnet_id: Id, node_id: &NodeId) -> Result<u64> {
        Ok(self.subnet(subnet_id)?.get_weight(node_id))
    }

    pub fn get_validator(&self, subnet_id: Id, node_id: &NodeId) -> Result<Validator> {
        self.subnet(subnet_id)?
            .get(node_id)
            .ok_or(ConsensusError::ValidatorNotFound(*node_id))
    }

    pub fn total_weight(&self, subnet_id: Id) -> Result<u64> {
        Ok(self.subnet(subnet_id)?.total_weight())
    }

    pub fn sample<R: Rng + ?Sized>(&self, subnet_id: Id, k: usize, rng: &mut R) -> Result<Bag<NodeId>> {
        self.subnet(subnet_id)?.sample_k(k, rng)
    }

    /// A new set holding the subnet's validators with at least `min_weight`.
    pub fn get_by_weight(&self, subnet_id: Id, min_weight: u64) -> Result<Set> {
        let filtered = Set::new();
        for v in self.subnet(subnet_id)?.list() {
            if v.weight >= min_weight {
                filtered.add(v.node_id, v.public_key, v.weight)?;
            }
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn make_id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    fn make_node_id(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 20])
    }

    #[test]
    fn test_subnet_registration() {
        let manager = Manager::new();
        let subnet = make_id(1);
        manager.add(subnet, Arc::new(Set::new())).unwrap();
        assert!(manager.contains(subnet));
        assert_eq!(manager.count(), 1);
        assert_eq!(
            manager.add(subnet, Arc::new(Set::new())),
            Err(ConsensusError::SubnetExists(subnet))
        );

        manager.remove(subnet).unwrap();
        assert!(manager.get(subnet).is_none());
        assert_eq!(
            manager.remove(subnet).unwrap_err(),
            ConsensusError::SubnetNotFound(subnet)
        );
    }

    #[test]
    fn test_unknown_subnet_does_not_create_state() {
        let manager = Manager::new();
        let subnet = make_id(9);
        assert_eq!(
            manager.add_staker(subnet, make_node_id(1), vec![], 1),
            Err(ConsensusError::SubnetNotFound(subnet))
        );
        assert_eq!(
            manager.total_weight(subnet),
            Err(ConsensusError::SubnetNotFound(subnet))
        );
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_subnets_are_isolated() {
        let manager = Manager::new();
        let (s1, s2) = (make_id(1), make_id(2));
        manager.add(s1, Arc::new(Set::new())).unwrap();
        manager.add(s2, Arc::new(Set::new())).unwrap();

        let node = make_node_id(7);
        manager.add_staker(s1, node, vec![], 10).unwrap();
        manager.add_weight(s1, node, 5).unwrap();

        assert_eq!(manager.get_weight(s1, &node), Ok(15));
        assert_eq!(manager.get_weight(s2, &node), Ok(0));
        assert_eq!(
            manager.get_validator(s2, &node),
            Err(ConsensusError::ValidatorNotFound(node))
        );

        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            manager.sample(s2, 2, &mut rng).unwrap_err(),
            ConsensusError::NoValidators
        );
        assert_eq!(manager.sample(s1, 2, &mut rng).unwrap().count(&node), 2);
    }

    #[test]
    fn test_get_by_weight() {
        let manager = Manager::new();
        let subnet = make_id(1);
        manager.add(subnet, Arc::new(Set::new())).unwrap();
        for byte in 1..=4u8 {
            manager
                .add_staker(subnet, make_node_id(byte), vec![byte], u64::from(byte) * 10)
                .unwrap();
        }
        manager.remove_weight(subnet, make_node_id(4), 40).unwrap();

        let heavy = manager.get_by_weight(subnet, 20).unwrap();
        assert_eq!(heavy.len(), 2);
        assert_eq!(heavy.total_weight(), 50);
        assert_eq!(heavy.get(&make_node_id(3)).unwrap().public_key, vec![3]);
    }
}
