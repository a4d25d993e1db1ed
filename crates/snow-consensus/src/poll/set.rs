use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use snow_ids::{Id, NodeId};
use snow_utils::Bag;
use tracing::{debug, trace};

use super::{Poll, PollFactory};

/// The outstanding polls of one engine, keyed by request ID.
///
/// Results are released in the order the polls were added: a poll that
/// finishes while an older one is still open is held back until the older
/// one finishes too. Votes and drops for unknown requests or voters are
/// ignored, since stale and duplicated network messages are expected.
pub struct Set {
    factory: Box<dyn PollFactory>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    polls: HashMap<u32, PollHolder>,
    /// Request IDs in the order their polls were added
    order: VecDeque<u32>,
}

struct PollHolder {
    poll: Box<dyn Poll>,
    started: Instant,
}

impl Set {
    pub fn new(factory: Box<dyn PollFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Starts a poll. Returns false if `request_id` is already outstanding.
    pub fn add(&self, request_id: u32, voters: Bag<NodeId>) -> bool {
        let mut inner = self.inner.lock();
        if inner.polls.contains_key(&request_id) {
            debug!(request_id, "dropping duplicated poll");
            return false;
        }
        trace!(request_id, voters = voters.len(), "adding poll");
        let poll = self.factory.new_poll(voters);
        inner.polls.insert(
            request_id,
            PollHolder {
                poll,
                started: Instant::now(),
            },
        );
        inner.order.push_back(request_id);
        true
    }

    /// Records a chit. Returns the tallies of every poll released by it,
    /// oldest first; empty if nothing finished.
    pub fn vote(&self, request_id: u32, voter: NodeId, choice: Id) -> Vec<Bag<Id>> {
        self.vote_with_ancestors(request_id, voter, choice, &[])
    }

    /// Records a chit that also supports `ancestors`. See
    /// [`Poll::vote_with_ancestors`].
    pub fn vote_with_ancestors(
        &self,
        request_id: u32,
        voter: NodeId,
        choice: Id,
        ancestors: &[Id],
    ) -> Vec<Bag<Id>> {
        self.update(request_id, voter, |poll| {
            poll.vote_with_ancestors(voter, choice, ancestors)
        })
    }

    /// Gives up on a voter, with the same release semantics as [`Set::vote`].
    pub fn drop(&self, request_id: u32, voter: NodeId) -> Vec<Bag<Id>> {
        self.update(request_id, voter, |poll| poll.drop_voter(voter))
    }

    fn update<F>(&self, request_id: u32, voter: NodeId, apply: F) -> Vec<Bag<Id>>
    where
        F: FnOnce(&mut dyn Poll),
    {
        let mut inner = self.inner.lock();
        let Some(holder) = inner.polls.get_mut(&request_id) else {
            trace!(request_id, %voter, "dropping message for unknown poll");
            return Vec::new();
        };

        apply(holder.poll.as_mut());
        if !holder.poll.finished() {
            return Vec::new();
        }
        inner.release_finished()
    }

    /// Number of outstanding polls.
    pub fn len(&self) -> usize {
        self.inner.lock().polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn release_finished(&mut self) -> Vec<Bag<Id>> {
        let mut results = Vec::new();
        while let Some(request_id) = self.order.front().copied() {
            let finished = self
                .polls
                .get(&request_id)
                .map_or(true, |holder| holder.poll.finished());
            if !finished {
                break;
            }
            self.order.pop_front();
            if let Some(holder) = self.polls.remove(&request_id) {
                let result = holder.poll.result();
                debug!(
                    request_id,
                    votes = result.len(),
                    duration = ?holder.started.elapsed(),
                    "poll finished"
                );
                results.push(result);
            }
        }
        results
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        write!(f, "current polls: ({})", inner.polls.len())?;
        for request_id in &inner.order {
            if let Some(holder) = inner.polls.get(request_id) {
                write!(f, "\n    RequestID {request_id}: {:?}", holder.poll)?;
            }
        }
        Ok(())
    }
}
