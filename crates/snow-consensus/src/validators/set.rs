use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use snow_ids::NodeId;
use snow_utils::Bag;

use super::{SetCallbackListener, Validator};
use crate::{ConsensusError, Result};

/// A set of validators with stake weights.
///
/// Members are kept in `NodeId` order so that the cumulative weight ranges
/// used by [`Set::sample`] are the same on every node holding the same set.
/// All state lives behind one lock; the total weight and the cumulative
/// ranges are recomputed inside every write.
///
/// Mutations hold `notify` from the write until their listeners return, so
/// listeners see changes in the order they were applied. Listeners may read
/// the set but must not mutate it.
pub struct Set {
    inner: RwLock<Inner>,
    notify: Mutex<()>,
}

#[derive(Default)]
struct Inner {
    validators: BTreeMap<NodeId, Validator>,
    /// Exclusive upper bound of each validator's range, in `validators` order
    cumulative: Vec<(u64, NodeId)>,
    total_weight: u64,
    listeners: Vec<Arc<dyn SetCallbackListener>>,
}

enum Change {
    Added(NodeId, Vec<u8>, u64),
    Removed(NodeId, u64),
    WeightChanged(NodeId, u64, u64),
}

impl Inner {
    fn reindex(&mut self) {
        self.cumulative.clear();
        let mut running = 0u64;
        for (node_id, validator) in &self.validators {
            // Cannot overflow: every insert checks the new total first.
            running += validator.weight;
            self.cumulative.push((running, *node_id));
        }
        self.total_weight = running;
    }

    fn sample(&self, seed: u64) -> Result<NodeId> {
        if self.total_weight == 0 {
            return Err(ConsensusError::NoValidators);
        }
        let target = seed % self.total_weight;
        let idx = self.cumulative.partition_point(|(end, _)| *end <= target);
        self.cumulative
            .get(idx)
            .map(|(_, node_id)| *node_id)
            .ok_or(ConsensusError::NoValidators)
    }
}

impl Default for Set {
    fn default() -> Self {
        Self::new()
    }
}

impl Set {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            notify: Mutex::new(()),
        }
    }

    /// Adds a validator.
    ///
    /// Fails with `InvalidWeight` for a zero weight, `DuplicateValidator` if
    /// `node_id` is present and `WeightOverflow` if the total would overflow.
    pub fn add(&self, node_id: NodeId, public_key: Vec<u8>, weight: u64) -> Result<()> {
        if weight == 0 {
            return Err(ConsensusError::InvalidWeight);
        }
        let _serial = self.notify.lock();
        let listeners = {
            let mut inner = self.inner.write();
            if inner.validators.contains_key(&node_id) {
                return Err(ConsensusError::DuplicateValidator(node_id));
            }
            inner
                .total_weight
                .checked_add(weight)
                .ok_or(ConsensusError::WeightOverflow)?;
            inner.validators.insert(
                node_id,
                Validator {
                    node_id,
                    public_key: public_key.clone(),
                    weight,
                },
            );
            inner.reindex();
            inner.listeners.clone()
        };
        notify(&listeners, &Change::Added(node_id, public_key, weight));
        Ok(())
    }

    /// Increases the weight of an existing validator.
    pub fn add_weight(&self, node_id: NodeId, weight: u64) -> Result<()> {
        if weight == 0 {
            return Err(ConsensusError::InvalidWeight);
        }
        let _serial = self.notify.lock();
        let (listeners, old, new) = {
            let mut inner = self.inner.write();
            inner
                .total_weight
                .checked_add(weight)
                .ok_or(ConsensusError::WeightOverflow)?;
            let validator = inner
                .validators
                .get_mut(&node_id)
                .ok_or(ConsensusError::ValidatorNotFound(node_id))?;
            let old = validator.weight;
            validator.weight += weight;
            let new = validator.weight;
            inner.reindex();
            (inner.listeners.clone(), old, new)
        };
        notify(&listeners, &Change::WeightChanged(node_id, old, new));
        Ok(())
    }

    /// Decreases the weight of an existing validator.
    ///
    /// Removing exactly the held weight removes the validator. Removing more
    /// fails with `InvalidWeight` and changes nothing.
    pub fn remove_weight(&self, node_id: NodeId, weight: u64) -> Result<()> {
        if weight == 0 {
            return Err(ConsensusError::InvalidWeight);
        }
        let _serial = self.notify.lock();
        let (listeners, change) = {
            let mut inner = self.inner.write();
            let validator = inner
                .validators
                .get_mut(&node_id)
                .ok_or(ConsensusError::ValidatorNotFound(node_id))?;
            let old = validator.weight;
            let change = match old.checked_sub(weight) {
                None => return Err(ConsensusError::InvalidWeight),
                Some(0) => {
                    inner.validators.remove(&node_id);
                    Change::Removed(node_id, old)
                }
                Some(new) => {
                    validator.weight = new;
                    Change::WeightChanged(node_id, old, new)
                }
            };
            inner.reindex();
            (inner.listeners.clone(), change)
        };
        notify(&listeners, &change);
        Ok(())
    }

    /// Removes a validator regardless of its weight.
    pub fn remove(&self, node_id: NodeId) -> Result<()> {
        let _serial = self.notify.lock();
        let (listeners, weight) = {
            let mut inner = self.inner.write();
            let validator = inner
                .validators
                .remove(&node_id)
                .ok_or(ConsensusError::ValidatorNotFound(node_id))?;
            inner.reindex();
            (inner.listeners.clone(), validator.weight)
        };
        notify(&listeners, &Change::Removed(node_id, weight));
        Ok(())
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Validator> {
        self.inner.read().validators.get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner.read().validators.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().validators.is_empty()
    }

    /// Members in `NodeId` order.
    pub fn list(&self) -> Vec<Validator> {
        self.inner.read().validators.values().cloned().collect()
    }

    /// Weight of `node_id`, or 0 if it is not a member.
    pub fn get_weight(&self, node_id: &NodeId) -> u64 {
        self.inner
            .read()
            .validators
            .get(node_id)
            .map_or(0, |v| v.weight)
    }

    pub fn total_weight(&self) -> u64 {
        self.inner.read().total_weight
    }

    /// Sum of the weights of the listed members. Non-members count as zero.
    pub fn subset_weight(&self, node_ids: &[NodeId]) -> Result<u64> {
        let inner = self.inner.read();
        node_ids.iter().try_fold(0u64, |total, node_id| {
            let weight = inner.validators.get(node_id).map_or(0, |v| v.weight);
            total
                .checked_add(weight)
                .ok_or(ConsensusError::WeightOverflow)
        })
    }

    /// Picks the validator whose cumulative range contains `seed % total_weight`.
    pub fn sample(&self, seed: u64) -> Result<NodeId> {
        self.inner.read().sample(seed)
    }

    /// Draws `k` independent weighted samples, with replacement.
    ///
    /// A validator drawn `n` times has multiplicity `n` in the returned bag.
    pub fn sample_k<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Bag<NodeId>> {
        let inner = self.inner.read();
        let mut sampled = Bag::new();
        for _ in 0..k {
            sampled.add(inner.sample(rng.gen())?);
        }
        Ok(sampled)
    }

    /// Registers a listener and replays an add event for every current member.
    pub fn register_callback_listener(&self, listener: Arc<dyn SetCallbackListener>) {
        let _serial = self.notify.lock();
        let members = {
            let mut inner = self.inner.write();
            inner.listeners.push(Arc::clone(&listener));
            inner.validators.values().cloned().collect::<Vec<_>>()
        };
        for v in members {
            listener.on_validator_added(v.node_id, &v.public_key, v.weight);
        }
    }
}

fn notify(listeners: &[Arc<dyn SetCallbackListener>], change: &Change) {
    for listener in listeners {
        match change {
            Change::Added(node_id, public_key, weight) => {
                listener.on_validator_added(*node_id, public_key, *weight);
            }
            Change::Removed(node_id, weight) => listener.on_validator_removed(*node_id, *weight),
            Change::WeightChanged(node_id, old, new) => {
                listener.on_validator_weight_changed(*node_id, *old, *new);
            }
        }
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Set")
            .field("validators", &inner.validators.len())
            .field("total_weight", &inner.total_weight)
            .finish()
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        write!(
            f,
            "Validator Set: (Size = {}, Weight = {})",
            inner.validators.len(),
            inner.total_weight
        )?;
        for (i, v) in inner.validators.values().enumerate() {
            write!(f, "\n    Validator[{i}]: {}, {}", v.node_id, v.weight)?;
        }
        Ok(())
    }
}
