//! Consensus protocols.

pub mod avalanche;
pub mod snowball;
pub mod snowman;

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use snow_ids::Id;
use snow_utils::Bag;

use crate::acceptor::AcceptorGroup;
use crate::{Parameters, Result};

/// An item that is decided exactly once.
pub trait Decidable: Send + Sync {
    /// Returns the unique, content-derived identifier.
    fn id(&self) -> Id;

    /// Returns the status of this item.
    fn status(&self) -> Status;

    /// Serialized form handed to acceptors.
    fn bytes(&self) -> &[u8];

    /// Accepts this item. Called at most once, after every ancestor.
    fn accept(&mut self) -> Result<()>;

    /// Rejects this item. Called at most once.
    fn reject(&mut self) -> Result<()>;
}

/// Status of a decidable item.
///
/// Transitions only ever go `Processing -> Accepted` or `Processing -> Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Unknown,
    Processing,
    Accepted,
    Rejected,
}

impl Status {
    /// Returns true if decided (accepted or rejected).
    pub fn decided(&self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }

    pub fn accepted(&self) -> bool {
        matches!(self, Status::Accepted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unknown => "Unknown",
            Status::Processing => "Processing",
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

/// Shared handles a consensus instance needs besides its parameters.
#[derive(Clone)]
pub struct Context {
    pub chain_id: Id,
    /// Notified of every accepted container before its `accept` runs
    pub acceptors: Arc<AcceptorGroup>,
}

impl Context {
    pub fn new(chain_id: Id, acceptors: Arc<AcceptorGroup>) -> Self {
        Self {
            chain_id,
            acceptors,
        }
    }
}

/// Number of decided IDs an instance remembers for status queries and
/// duplicate detection. Older decisions are reported as [`Status::Unknown`].
pub const DECIDED_HISTORY: usize = 8192;

pub(crate) fn decided_cache<V>(capacity: usize) -> LruCache<Id, V> {
    LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
}

/// Result of a consensus health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub processing: usize,
    /// Age of the longest-processing item
    pub oldest_processing: Option<Duration>,
    pub healthy: bool,
}

impl Health {
    pub(crate) fn evaluate(
        params: &Parameters,
        processing: usize,
        oldest_processing: Option<Duration>,
    ) -> Self {
        let too_many = processing > params.optimal_processing;
        let too_old = oldest_processing.is_some_and(|age| age > params.max_item_processing_time);
        Self {
            processing,
            oldest_processing,
            healthy: !too_many && !too_old,
        }
    }
}

/// Interface the engine drives, implemented by the linear and DAG instances.
pub trait Consensus: Send + Sync {
    /// The kind of container this instance decides.
    type Item: ?Sized + Decidable;

    /// Issues a new container. Verification failures are returned and the
    /// container is not admitted.
    fn add(&mut self, item: Box<Self::Item>) -> Result<()>;

    /// Applies the weighted chits of one finished poll.
    fn record_poll(&mut self, votes: &Bag<Id>) -> Result<()>;

    /// Returns true once nothing is processing.
    fn finalized(&self) -> bool;

    /// The container this node currently asks its peers about.
    fn preference(&self) -> Id;

    /// Processing ancestors of `id`, which a chit for `id` also supports.
    /// Empty for unknown or decided IDs.
    fn ancestors(&self, id: &Id) -> Vec<Id>;

    fn num_processing(&self) -> usize;

    fn health_check(&self) -> Health;
}
