//! Poll aggregation.
//!
//! A [`Poll`] tracks one round of queries: the weighted bag of sampled
//! voters still expected to answer and the weighted votes received so far.
//! The [`Set`] keeps every outstanding poll of an engine.

mod early_term;
mod set;

use std::fmt;

use snow_ids::{Id, NodeId};
use snow_utils::Bag;

pub use early_term::{EarlyTermFactory, EarlyTermPoll};
pub use set::Set;

/// One outstanding round of queries.
pub trait Poll: Send + fmt::Debug {
    /// Records `voter`'s chit. Voters that were not sampled, or that already
    /// voted or were dropped, are ignored.
    fn vote(&mut self, voter: NodeId, choice: Id);

    /// Records a chit for `choice` that also supports each of `ancestors`,
    /// as a chit for a block supports the blocks it builds on. The tally
    /// keeps only `choice`; polls that terminate early look at the rest.
    fn vote_with_ancestors(&mut self, voter: NodeId, choice: Id, _ancestors: &[Id]) {
        self.vote(voter, choice);
    }

    /// Gives up on `voter`; its weight is excluded from the tally.
    fn drop_voter(&mut self, voter: NodeId);

    /// Returns true once the tally can no longer change the outcome.
    fn finished(&self) -> bool;

    /// The weighted votes received so far.
    fn result(&self) -> Bag<Id>;
}

/// Builds a poll for a freshly sampled set of voters.
pub trait PollFactory: Send + Sync {
    fn new_poll(&self, voters: Bag<NodeId>) -> Box<dyn Poll>;
}

/// A poll that finishes only when every sampled voter voted or was dropped.
#[derive(Debug, Clone)]
pub struct NoEarlyTermPoll {
    /// Voters yet to answer, with their sample multiplicity
    polled: Bag<NodeId>,
    votes: Bag<Id>,
}

impl NoEarlyTermPoll {
    pub fn new(voters: Bag<NodeId>) -> Self {
        Self {
            polled: voters,
            votes: Bag::new(),
        }
    }

    /// Weight of the voters that have not answered yet.
    pub fn outstanding(&self) -> u64 {
        self.polled.len()
    }

    pub(crate) fn votes(&self) -> &Bag<Id> {
        &self.votes
    }

    /// Records `voter`'s chit and returns the weight it carried, zero if the
    /// voter was not outstanding.
    pub(crate) fn record(&mut self, voter: NodeId, choice: Id) -> u64 {
        let weight = self.polled.remove(&voter);
        self.votes.add_count(choice, weight);
        weight
    }
}

impl Poll for NoEarlyTermPoll {
    fn vote(&mut self, voter: NodeId, choice: Id) {
        self.record(voter, choice);
    }

    fn drop_voter(&mut self, voter: NodeId) {
        self.polled.remove(&voter);
    }

    fn finished(&self) -> bool {
        self.polled.is_empty()
    }

    fn result(&self) -> Bag<Id> {
        self.votes.clone()
    }
}

/// Builds [`NoEarlyTermPoll`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEarlyTermFactory;

impl PollFactory for NoEarlyTermFactory {
    fn new_poll(&self, voters: Bag<NodeId>) -> Box<dyn Poll> {
        Box::new(NoEarlyTermPoll::new(voters))
    }
}
