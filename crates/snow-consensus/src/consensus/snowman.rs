//! Snowman consensus implementation.
//!
//! Snowman decides a linear chain. Processing blocks form a tree rooted at
//! the last accepted block; every block with children owns an [`Nnary`]
//! cell choosing among them. A chit for a block is a vote for each of its
//! processing ancestors, so one poll updates every cell on the voted path.
//! When the cell of the last accepted block finalizes, its preferred child
//! is accepted and every sibling subtree is rejected.
//!
//! Only the last accepted block stays in the tree. Older decisions live in a
//! bounded cache, so a block building on a forgotten ID is reported as
//! [`ConsensusError::ParentNotFound`].

use std::collections::HashMap;
use std::time::Instant;

use lru::LruCache;
use snow_ids::Id;
use snow_utils::Bag;
use tracing::{debug, trace};

use super::snowball::Nnary;
use super::{decided_cache, Consensus, Context, Decidable, Health, Status, DECIDED_HISTORY};
use crate::{ConsensusError, Parameters, Result};

/// A block in the Snowman chain.
pub trait Block: Decidable {
    /// Returns the parent block's ID.
    fn parent(&self) -> Id;

    /// Returns the block's height.
    fn height(&self) -> u64;

    /// Verifies the block is valid.
    fn verify(&self) -> Result<()>;
}

/// Block metadata stored by Snowman.
struct BlockNode {
    /// `None` once accepted; only the last accepted block is kept that way
    block: Option<Box<dyn Block>>,
    parent: Id,
    height: u64,
    children: Vec<Id>,
    /// Choice among `children`, created with the first child
    snowball: Option<Nnary>,
    added: Instant,
}

/// Snowman linear chain consensus.
pub struct Snowman {
    params: Parameters,
    ctx: Context,
    last_accepted: Id,
    /// The last accepted block and every processing block
    blocks: HashMap<Id, BlockNode>,
    /// Recently decided blocks
    decided: LruCache<Id, Status>,
    /// Tip of the preferred chain
    preference: Id,
}

impl Snowman {
    /// Creates an instance on top of an already accepted block.
    pub fn new(params: Parameters, ctx: Context, last_accepted: Id, height: u64) -> Result<Self> {
        params.validate()?;

        let mut blocks = HashMap::new();
        blocks.insert(
            last_accepted,
            BlockNode {
                block: None,
                parent: Id::EMPTY,
                height,
                children: Vec::new(),
                snowball: None,
                added: Instant::now(),
            },
        );
        let mut decided = decided_cache(DECIDED_HISTORY);
        decided.put(last_accepted, Status::Accepted);

        Ok(Self {
            params,
            ctx,
            last_accepted,
            blocks,
            decided,
            preference: last_accepted,
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Returns the last accepted block ID and its height.
    pub fn last_accepted(&self) -> (Id, u64) {
        let height = self
            .blocks
            .get(&self.last_accepted)
            .map_or(0, |node| node.height);
        (self.last_accepted, height)
    }

    /// Gets the status of a block.
    pub fn status(&self, id: &Id) -> Status {
        if *id == self.last_accepted {
            return Status::Accepted;
        }
        if let Some(status) = self.decided.peek(id) {
            return *status;
        }
        if self.blocks.contains_key(id) {
            Status::Processing
        } else {
            Status::Unknown
        }
    }

    pub fn is_processing(&self, id: &Id) -> bool {
        *id != self.last_accepted && self.blocks.contains_key(id)
    }

    /// Returns true for the last accepted block and every processing block
    /// on the preferred chain.
    pub fn is_preferred(&self, id: &Id) -> bool {
        let mut current = self.preference;
        loop {
            if current == *id {
                return true;
            }
            if current == self.last_accepted {
                return false;
            }
            match self.blocks.get(&current) {
                Some(node) => current = node.parent,
                None => return false,
            }
        }
    }

    fn add_block(&mut self, block: Box<dyn Block>) -> Result<()> {
        let id = block.id();
        if self.blocks.contains_key(&id) {
            return Err(ConsensusError::BlockExists(id));
        }
        if self.decided.contains(&id) {
            return Err(ConsensusError::AlreadyDecided { id });
        }

        let parent_id = block.parent();
        let Some(parent) = self.blocks.get(&parent_id) else {
            return Err(match self.decided.peek(&parent_id) {
                Some(Status::Rejected) => ConsensusError::InvalidBlock {
                    id,
                    reason: "parent is rejected".to_string(),
                },
                Some(_) => ConsensusError::InvalidBlock {
                    id,
                    reason: "parent is below the last accepted block".to_string(),
                },
                None => ConsensusError::ParentNotFound(parent_id),
            });
        };
        if block.height() != parent.height + 1 {
            return Err(ConsensusError::InvalidBlock {
                id,
                reason: format!(
                    "height {} does not follow parent height {}",
                    block.height(),
                    parent.height
                ),
            });
        }
        block.verify().map_err(|err| ConsensusError::InvalidBlock {
            id,
            reason: err.to_string(),
        })?;

        let parent = self
            .blocks
            .get_mut(&parent_id)
            .ok_or(ConsensusError::ParentNotFound(parent_id))?;
        parent.children.push(id);
        match parent.snowball.as_mut() {
            Some(snowball) if !snowball.finalized() => snowball.add(id)?,
            // The sibling is rejected once the finalized choice is accepted.
            Some(_) => {}
            None => parent.snowball = Some(Nnary::new(&self.params, id)),
        }

        let height = block.height();
        self.blocks.insert(
            id,
            BlockNode {
                block: Some(block),
                parent: parent_id,
                height,
                children: Vec::new(),
                snowball: None,
                added: Instant::now(),
            },
        );
        debug!(block = %id, parent = %parent_id, height, "added block");

        self.update_preference();
        Ok(())
    }

    fn apply_poll(&mut self, votes: &Bag<Id>) -> Result<()> {
        // Chits for a block are chits for every processing ancestor; bucket
        // them by the parent whose cell decides between the children.
        let mut child_votes: HashMap<Id, Bag<Id>> = HashMap::new();
        for (voted, count) in votes.iter() {
            let mut current = *voted;
            while current != self.last_accepted {
                let Some(node) = self.blocks.get(&current) else {
                    trace!(block = %current, "dropping chit for unknown block");
                    break;
                };
                child_votes
                    .entry(node.parent)
                    .or_default()
                    .add_count(current, count);
                current = node.parent;
            }
        }

        let alpha_preference = self.params.alpha_preference as u64;
        let mut current = self.last_accepted;
        loop {
            let Some(node) = self.blocks.get_mut(&current) else {
                break;
            };
            let Some(snowball) = node.snowball.as_mut() else {
                break;
            };
            let bag = child_votes.remove(&current).unwrap_or_default();
            if !snowball.finalized() {
                snowball.record_poll(&bag)?;
            }

            let next = bag
                .mode()
                .filter(|(_, count)| *count >= alpha_preference)
                .map(|(child, _)| child);
            let off_path: Vec<Id> = node
                .children
                .iter()
                .copied()
                .filter(|child| Some(*child) != next)
                .collect();
            for child in off_path {
                self.record_unsuccessful_subtree(child)?;
            }

            match next {
                Some(child) => current = child,
                None => break,
            }
        }

        self.accept_finalized()?;
        self.update_preference();
        Ok(())
    }

    fn record_unsuccessful_subtree(&mut self, root: Id) -> Result<()> {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.blocks.get_mut(&id) else {
                continue;
            };
            if let Some(snowball) = node.snowball.as_mut() {
                if !snowball.finalized() {
                    snowball.record_unsuccessful_poll()?;
                }
            }
            stack.extend(node.children.iter().copied());
        }
        Ok(())
    }

    /// Accepts down the chain while the head's cell is finalized.
    fn accept_finalized(&mut self) -> Result<()> {
        loop {
            let head = self.last_accepted;
            let Some(node) = self.blocks.get(&head) else {
                return Err(ConsensusError::Internal(format!(
                    "last accepted block {head} missing"
                )));
            };
            let Some(snowball) = node.snowball.as_ref() else {
                return Ok(());
            };
            if !snowball.finalized() {
                return Ok(());
            }
            let winner = snowball.preference();
            let siblings: Vec<Id> = node
                .children
                .iter()
                .copied()
                .filter(|child| *child != winner)
                .collect();

            self.accept_block(winner)?;
            self.blocks.remove(&head);
            self.last_accepted = winner;
            for sibling in siblings {
                self.reject_subtree(sibling)?;
            }
        }
    }

    fn accept_block(&mut self, id: Id) -> Result<()> {
        let node = self
            .blocks
            .get_mut(&id)
            .ok_or_else(|| ConsensusError::Internal(format!("accepted block {id} missing")))?;
        let Some(block) = node.block.as_mut() else {
            return Err(ConsensusError::AlreadyDecided { id });
        };

        self.ctx
            .acceptors
            .accept(self.ctx.chain_id, id, block.bytes())?;
        block.accept()?;
        node.block = None;
        self.decided.put(id, Status::Accepted);
        debug!(block = %id, height = node.height, "accepted block");
        Ok(())
    }

    /// Rejects a block and all its descendants.
    fn reject_subtree(&mut self, root: Id) -> Result<()> {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.blocks.remove(&id) else {
                continue;
            };
            if let Some(mut block) = node.block {
                block.reject()?;
            }
            self.decided.put(id, Status::Rejected);
            debug!(block = %id, height = node.height, "rejected block");
            stack.extend(node.children);
        }
        Ok(())
    }

    fn update_preference(&mut self) {
        let mut preference = self.last_accepted;
        while let Some(snowball) = self
            .blocks
            .get(&preference)
            .and_then(|node| node.snowball.as_ref())
        {
            preference = snowball.preference();
        }
        self.preference = preference;
    }
}

impl Consensus for Snowman {
    type Item = dyn Block;

    fn add(&mut self, item: Box<dyn Block>) -> Result<()> {
        self.add_block(item)
    }

    fn record_poll(&mut self, votes: &Bag<Id>) -> Result<()> {
        self.apply_poll(votes)
    }

    fn finalized(&self) -> bool {
        self.blocks.len() == 1
    }

    fn preference(&self) -> Id {
        self.preference
    }

    fn ancestors(&self, id: &Id) -> Vec<Id> {
        let mut ancestors = Vec::new();
        if !self.is_processing(id) {
            return ancestors;
        }
        let mut current = self.blocks.get(id).map_or(self.last_accepted, |node| node.parent);
        while current != self.last_accepted {
            let Some(node) = self.blocks.get(&current) else {
                break;
            };
            ancestors.push(current);
            current = node.parent;
        }
        ancestors
    }

    fn num_processing(&self) -> usize {
        self.blocks.len() - 1
    }

    fn health_check(&self) -> Health {
        let oldest = self
            .blocks
            .iter()
            .filter(|(id, _)| **id != self.last_accepted)
            .map(|(_, node)| node.added)
            .min()
            .map(|added| added.elapsed());
        Health::evaluate(&self.params, self.num_processing(), oldest)
    }
}
