use snow_ids::{Id, NodeId};
use snow_utils::Bag;

use super::{NoEarlyTermPoll, Poll, PollFactory};
use crate::Parameters;

/// A poll that stops waiting once the remaining voters cannot matter.
///
/// Termination looks at support rather than raw chits: a chit supports its
/// choice and every ancestor passed to [`Poll::vote_with_ancestors`], so
/// chits spread along one chain add up on their common ancestor. The poll
/// finishes early when no choice can still reach `alpha_preference`, or when
/// one choice holds `alpha_confidence` and the weight not supporting it,
/// outstanding voters included, could not lift a competitor to
/// `alpha_preference`. Choices below the leader may miss the outstanding
/// chits in that case.
#[derive(Debug, Clone)]
pub struct EarlyTermPoll {
    poll: NoEarlyTermPoll,
    /// Weight supporting each choice, directly or through a descendant
    support: Bag<Id>,
    alpha_preference: u64,
    alpha_confidence: u64,
}

impl EarlyTermPoll {
    pub fn new(voters: Bag<NodeId>, alpha_preference: u64, alpha_confidence: u64) -> Self {
        Self {
            poll: NoEarlyTermPoll::new(voters),
            support: Bag::new(),
            alpha_preference,
            alpha_confidence,
        }
    }
}

impl Poll for EarlyTermPoll {
    fn vote(&mut self, voter: NodeId, choice: Id) {
        self.vote_with_ancestors(voter, choice, &[]);
    }

    fn vote_with_ancestors(&mut self, voter: NodeId, choice: Id, ancestors: &[Id]) {
        let weight = self.poll.record(voter, choice);
        if weight == 0 {
            return;
        }
        self.support.add_count(choice, weight);
        for ancestor in ancestors {
            self.support.add_count(*ancestor, weight);
        }
    }

    fn drop_voter(&mut self, voter: NodeId) {
        self.poll.drop_voter(voter);
    }

    fn finished(&self) -> bool {
        let remaining = self.poll.outstanding();
        if remaining == 0 {
            return true;
        }

        let leader = self.support.mode().map_or(0, |(_, count)| count);
        // Even if every outstanding voter backed the leader, it would fall short.
        if leader + remaining < self.alpha_preference {
            return true;
        }
        let against = self.poll.votes().len().saturating_sub(leader);
        leader >= self.alpha_confidence && against + remaining < self.alpha_preference
    }

    fn result(&self) -> Bag<Id> {
        self.poll.result()
    }
}

/// Builds [`EarlyTermPoll`]s with the thresholds of a parameter set.
#[derive(Debug, Clone, Copy)]
pub struct EarlyTermFactory {
    alpha_preference: u64,
    alpha_confidence: u64,
}

impl EarlyTermFactory {
    pub fn new(params: &Parameters) -> Self {
        Self {
            alpha_preference: params.alpha_preference as u64,
            alpha_confidence: params.alpha_confidence as u64,
        }
    }
}

impl PollFactory for EarlyTermFactory {
    fn new_poll(&self, voters: Bag<NodeId>) -> Box<dyn Poll> {
        Box::new(EarlyTermPoll::new(
            voters,
            self.alpha_preference,
            self.alpha_confidence,
        ))
    }
}
