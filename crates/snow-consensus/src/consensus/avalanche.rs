//! Avalanche consensus over a DAG of vertices.
//!
//! Every vertex carries a batch of transactions and each transaction belongs
//! to one conflict set, decided by its own [`Nnary`] cell. A chit for a
//! vertex supports the transactions of that vertex and of all its processing
//! ancestors. A vertex is accepted once its parents are accepted and each of
//! its transactions won its conflict set; it is rejected as soon as one of its
//! transactions loses or an ancestor is rejected.
//!
//! Vertices live in an arena keyed by ID. Parent lists are owned by the
//! vertices; the children index is derived from them and rebuilt after every
//! batch of decisions.
//!
//! A stop vertex must descend from the whole frontier: every edge vertex and
//! every processing vertex is one of its ancestors, and no other vertex is
//! admitted while it is processing. Once the edge collapses to the accepted
//! stop vertex the DAG is linearized and the stop vertex becomes the genesis
//! of a linear chain.
//!
//! Decided vertices and transactions are remembered in bounded caches; only
//! the edge and the processing state are kept exactly.

use std::collections::HashMap;
use std::time::Instant;

use lru::LruCache;
use snow_ids::Id;
use snow_utils::{Bag, Set};
use tracing::{debug, info, trace};

use super::snowball::Nnary;
use super::{decided_cache, Consensus, Context, Decidable, Health, Status, DECIDED_HISTORY};
use crate::{ConsensusError, Parameters, Result};

/// A transaction decided by [`Avalanche`].
pub trait Tx: Decidable {
    /// Transactions sharing a conflict set are mutually exclusive.
    fn conflict_set(&self) -> Id;

    fn verify(&self) -> Result<()> {
        Ok(())
    }
}

/// A vertex of the DAG.
pub trait Vertex: Decidable {
    fn parents(&self) -> Vec<Id>;

    fn height(&self) -> u64;

    /// The transactions issued in this vertex.
    fn txs(&self) -> Result<Vec<Box<dyn Tx>>>;

    /// Returns true for the vertex that ends the DAG.
    fn is_stop_vertex(&self) -> bool {
        false
    }

    fn verify(&self) -> Result<()> {
        Ok(())
    }
}

struct VertexNode {
    vertex: Box<dyn Vertex>,
    parents: Vec<Id>,
    height: u64,
    txs: Vec<Id>,
    stop: bool,
    added: Instant,
}

struct TxNode {
    tx: Box<dyn Tx>,
    conflict_set: Id,
    vertex: Id,
}

/// Avalanche DAG consensus.
pub struct Avalanche {
    params: Parameters,
    ctx: Context,
    /// Processing vertices
    vertices: HashMap<Id, VertexNode>,
    /// Processing children of every vertex, derived from `vertices`
    children: HashMap<Id, Vec<Id>>,
    /// Processing transactions
    txs: HashMap<Id, TxNode>,
    /// Cells of the conflict sets with processing members
    conflicts: HashMap<Id, Nnary>,
    /// Conflict set -> accepted transaction
    decided_conflicts: LruCache<Id, Id>,
    /// Accepted vertices that left the edge -> height
    accepted: LruCache<Id, u64>,
    rejected: LruCache<Id, ()>,
    /// Decided transactions
    tx_status: LruCache<Id, Status>,
    /// Accepted vertices without accepted children -> height
    edge: HashMap<Id, u64>,
    stop_vertex: Option<Id>,
    linearized: bool,
}

impl Avalanche {
    /// Creates an instance whose accepted frontier is `genesis`, given as
    /// `(vertex, height)` pairs.
    pub fn new(
        params: Parameters,
        ctx: Context,
        genesis: impl IntoIterator<Item = (Id, u64)>,
    ) -> Result<Self> {
        params.validate()?;

        let edge: HashMap<Id, u64> = genesis.into_iter().collect();
        if edge.is_empty() {
            return Err(ConsensusError::InvalidVertex {
                id: Id::EMPTY,
                reason: "empty genesis".to_string(),
            });
        }

        Ok(Self {
            params,
            ctx,
            vertices: HashMap::new(),
            children: HashMap::new(),
            txs: HashMap::new(),
            conflicts: HashMap::new(),
            decided_conflicts: decided_cache(DECIDED_HISTORY),
            accepted: decided_cache(DECIDED_HISTORY),
            rejected: decided_cache(DECIDED_HISTORY),
            tx_status: decided_cache(DECIDED_HISTORY),
            edge,
            stop_vertex: None,
            linearized: false,
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn edge(&self) -> Vec<Id> {
        let mut edge: Vec<Id> = self.edge.keys().copied().collect();
        edge.sort_unstable();
        edge
    }

    pub fn linearized(&self) -> bool {
        self.linearized
    }

    /// The issued stop vertex, processing or accepted. Cleared if it is
    /// rejected.
    pub fn stop_vertex(&self) -> Option<Id> {
        self.stop_vertex
    }

    /// Once linearized, the ID and height the linear chain starts from.
    pub fn linearized_genesis(&self) -> Option<(Id, u64)> {
        if !self.linearized {
            return None;
        }
        let stop = self.stop_vertex?;
        self.edge.get(&stop).map(|height| (stop, *height))
    }

    pub fn vertex_status(&self, id: &Id) -> Status {
        if self.edge.contains_key(id) || self.accepted.contains(id) {
            Status::Accepted
        } else if self.rejected.contains(id) {
            Status::Rejected
        } else if self.vertices.contains_key(id) {
            Status::Processing
        } else {
            Status::Unknown
        }
    }

    pub fn tx_status(&self, id: &Id) -> Status {
        if let Some(status) = self.tx_status.peek(id) {
            *status
        } else if self.txs.contains_key(id) {
            Status::Processing
        } else {
            Status::Unknown
        }
    }

    /// Returns the strongly preferred processing vertices: those whose
    /// transactions all lead their conflict sets and whose processing
    /// parents are strongly preferred too.
    pub fn preferences(&self) -> Set<Id> {
        let mut preferred = Set::new();
        for (_, id) in self.by_height() {
            let Some(node) = self.vertices.get(&id) else {
                continue;
            };
            let parents_preferred = node
                .parents
                .iter()
                .all(|parent| !self.vertices.contains_key(parent) || preferred.contains(parent));
            let txs_preferred = node.txs.iter().all(|tx_id| {
                self.txs
                    .get(tx_id)
                    .and_then(|tx| self.conflicts.get(&tx.conflict_set))
                    .is_some_and(|snowball| snowball.preference() == *tx_id)
            });
            if parents_preferred && txs_preferred {
                preferred.add(id);
            }
        }
        preferred
    }

    /// Processing vertices sorted by `(height, id)`, parents first.
    fn by_height(&self) -> Vec<(u64, Id)> {
        let mut ordered: Vec<(u64, Id)> = self
            .vertices
            .iter()
            .map(|(id, node)| (node.height, *id))
            .collect();
        ordered.sort_unstable();
        ordered
    }

    /// Height of an accepted vertex, if it is still remembered.
    fn accepted_height(&self, id: &Id) -> Option<u64> {
        self.edge
            .get(id)
            .or_else(|| self.accepted.peek(id))
            .copied()
    }

    fn add_vertex(&mut self, vertex: Box<dyn Vertex>) -> Result<()> {
        if self.linearized {
            return Err(ConsensusError::Linearized);
        }
        let id = vertex.id();
        if self.vertices.contains_key(&id) {
            return Err(ConsensusError::VertexExists(id));
        }
        if self.accepted_height(&id).is_some() || self.rejected.contains(&id) {
            return Err(ConsensusError::AlreadyDecided { id });
        }
        let invalid = |reason: String| ConsensusError::InvalidVertex { id, reason };
        if let Some(stop) = self.stop_vertex {
            return Err(invalid(format!("stop vertex {stop} is processing")));
        }

        let parents = vertex.parents();
        if parents.is_empty() {
            return Err(invalid("no parents".to_string()));
        }
        let mut parent_height = 0;
        for parent in &parents {
            let height = if let Some(height) = self.accepted_height(parent) {
                height
            } else if let Some(node) = self.vertices.get(parent) {
                node.height
            } else if self.rejected.contains(parent) {
                return Err(invalid(format!("parent {parent} is rejected")));
            } else {
                return Err(ConsensusError::ParentNotFound(*parent));
            };
            parent_height = parent_height.max(height);
        }
        if vertex.height() != parent_height + 1 {
            return Err(invalid(format!(
                "height {} does not follow parent height {parent_height}",
                vertex.height()
            )));
        }
        vertex.verify().map_err(|err| invalid(err.to_string()))?;

        let stop = vertex.is_stop_vertex();
        let txs = vertex.txs().map_err(|err| invalid(err.to_string()))?;
        if stop {
            if !txs.is_empty() {
                return Err(invalid("stop vertex carries transactions".to_string()));
            }
            if let Some(uncovered) = self.uncovered_by(&parents) {
                return Err(invalid(format!(
                    "stop vertex does not descend from frontier vertex {uncovered}"
                )));
            }
        }

        let mut tx_ids = Set::new();
        let mut conflict_sets = Set::new();
        for tx in &txs {
            let tx_id = tx.id();
            if self.txs.contains_key(&tx_id)
                || self.tx_status.contains(&tx_id)
                || !tx_ids.add(tx_id)
            {
                return Err(invalid(format!("transaction {tx_id} already issued")));
            }
            let conflict_set = tx.conflict_set();
            let decided = self.decided_conflicts.contains(&conflict_set)
                || self
                    .conflicts
                    .get(&conflict_set)
                    .is_some_and(Nnary::finalized);
            if decided {
                return Err(invalid(format!("conflict set {conflict_set} is decided")));
            }
            if !conflict_sets.add(conflict_set) {
                return Err(invalid(format!(
                    "conflicting transactions in conflict set {conflict_set}"
                )));
            }
            tx.verify().map_err(|err| invalid(err.to_string()))?;
        }

        let height = vertex.height();
        let mut tx_list = Vec::with_capacity(txs.len());
        for tx in txs {
            let tx_id = tx.id();
            let conflict_set = tx.conflict_set();
            match self.conflicts.get_mut(&conflict_set) {
                Some(snowball) => snowball.add(tx_id)?,
                None => {
                    self.conflicts
                        .insert(conflict_set, Nnary::new(&self.params, tx_id));
                }
            }
            self.txs.insert(
                tx_id,
                TxNode {
                    tx,
                    conflict_set,
                    vertex: id,
                },
            );
            tx_list.push(tx_id);
        }
        for parent in &parents {
            self.children.entry(*parent).or_default().push(id);
        }
        if stop {
            self.stop_vertex = Some(id);
        }
        debug!(vertex = %id, height, txs = tx_list.len(), stop, "added vertex");
        self.vertices.insert(
            id,
            VertexNode {
                vertex,
                parents,
                height,
                txs: tx_list,
                stop,
                added: Instant::now(),
            },
        );

        self.update()
    }

    /// Returns an edge or processing vertex that is not an ancestor of a
    /// vertex with `parents`, if any.
    fn uncovered_by(&self, parents: &[Id]) -> Option<Id> {
        let mut ancestors = Set::new();
        let mut stack = parents.to_vec();
        while let Some(id) = stack.pop() {
            if !ancestors.add(id) {
                continue;
            }
            if let Some(node) = self.vertices.get(&id) {
                stack.extend(node.parents.iter().copied());
            }
        }
        self.edge
            .keys()
            .chain(self.vertices.keys())
            .find(|id| !ancestors.contains(id))
            .copied()
    }

    fn apply_poll(&mut self, votes: &Bag<Id>) -> Result<()> {
        if self.linearized {
            trace!("dropping poll after linearization");
            return Ok(());
        }

        let tx_votes = self.tx_votes(votes);
        let mut newly_finalized = Vec::new();
        for (conflict_set, snowball) in self.conflicts.iter_mut() {
            if snowball.finalized() {
                continue;
            }
            snowball.record_poll(&tx_votes)?;
            if snowball.finalized() {
                newly_finalized.push(*conflict_set);
            }
        }

        for conflict_set in newly_finalized {
            let Some(snowball) = self.conflicts.get(&conflict_set) else {
                continue;
            };
            let winner = snowball.preference();
            let losers: Vec<Id> = snowball
                .choices()
                .iter()
                .copied()
                .filter(|tx_id| *tx_id != winner)
                .collect();
            debug!(%conflict_set, %winner, "conflict set finalized");
            for loser in losers {
                if let Some(vertex) = self.txs.get(&loser).map(|tx| tx.vertex) {
                    self.reject_vertex(vertex)?;
                }
            }
        }

        self.update()
    }

    /// Translates vertex chits into transaction votes.
    fn tx_votes(&self, votes: &Bag<Id>) -> Bag<Id> {
        let mut tx_votes = Bag::new();
        for (voted, count) in votes.iter() {
            if !self.vertices.contains_key(voted) {
                trace!(vertex = %voted, "dropping chit for non-processing vertex");
                continue;
            }
            let mut visited = Set::new();
            let mut stack = vec![*voted];
            while let Some(id) = stack.pop() {
                if !visited.add(id) {
                    continue;
                }
                let Some(node) = self.vertices.get(&id) else {
                    continue;
                };
                for tx_id in &node.txs {
                    tx_votes.add_count(*tx_id, count);
                }
                stack.extend(node.parents.iter().copied());
            }
        }
        tx_votes
    }

    /// Accepts every vertex whose parents are accepted and whose
    /// transactions all won their conflict sets.
    fn update(&mut self) -> Result<()> {
        for (_, id) in self.by_height() {
            if self.linearized {
                break;
            }
            let Some(node) = self.vertices.get(&id) else {
                continue;
            };
            // A rejected parent takes its children with it, so a parent
            // that is no longer processing was accepted.
            let parents_accepted = node
                .parents
                .iter()
                .all(|parent| !self.vertices.contains_key(parent));
            if parents_accepted && node.txs.iter().all(|tx_id| self.tx_won(tx_id)) {
                self.accept_vertex(id)?;
            }
        }
        self.rebuild_children_index();
        Ok(())
    }

    fn tx_won(&self, tx_id: &Id) -> bool {
        self.txs
            .get(tx_id)
            .and_then(|tx| self.conflicts.get(&tx.conflict_set))
            .is_some_and(|snowball| snowball.finalized() && snowball.preference() == *tx_id)
    }

    fn accept_vertex(&mut self, id: Id) -> Result<()> {
        let Some(mut node) = self.vertices.remove(&id) else {
            return Ok(());
        };

        for tx_id in &node.txs {
            let Some(mut tx) = self.txs.remove(tx_id) else {
                continue;
            };
            self.ctx
                .acceptors
                .accept(self.ctx.chain_id, *tx_id, tx.tx.bytes())?;
            tx.tx.accept()?;
            self.tx_status.put(*tx_id, Status::Accepted);
            self.conflicts.remove(&tx.conflict_set);
            self.decided_conflicts.put(tx.conflict_set, *tx_id);
            trace!(tx = %tx_id, "accepted transaction");
        }

        self.ctx
            .acceptors
            .accept(self.ctx.chain_id, id, node.vertex.bytes())?;
        node.vertex.accept()?;
        for parent in &node.parents {
            if let Some(height) = self.edge.remove(parent) {
                self.accepted.put(*parent, height);
            }
        }
        self.edge.insert(id, node.height);
        debug!(vertex = %id, height = node.height, "accepted vertex");

        if node.stop {
            if self.edge.len() != 1 {
                return Err(ConsensusError::Internal(format!(
                    "stop vertex {id} accepted beside {} other edge vertices",
                    self.edge.len() - 1
                )));
            }
            self.linearize(id, node.height)?;
        }
        Ok(())
    }

    fn linearize(&mut self, stop: Id, height: u64) -> Result<()> {
        self.linearized = true;
        self.stop_vertex = Some(stop);

        let remaining: Vec<Id> = self.by_height().into_iter().map(|(_, id)| id).collect();
        for id in remaining {
            self.reject_vertex(id)?;
        }
        info!(stop_vertex = %stop, height, "linearized");
        Ok(())
    }

    /// Rejects a vertex, its transactions and every processing descendant.
    fn reject_vertex(&mut self, root: Id) -> Result<()> {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(mut node) = self.vertices.remove(&id) else {
                continue;
            };
            if let Some(children) = self.children.get(&id) {
                stack.extend(children.iter().copied());
            }
            for tx_id in &node.txs {
                self.reject_tx(*tx_id)?;
            }
            node.vertex.reject()?;
            self.rejected.put(id, ());
            if self.stop_vertex == Some(id) {
                self.stop_vertex = None;
            }
            debug!(vertex = %id, height = node.height, "rejected vertex");
        }
        Ok(())
    }

    fn reject_tx(&mut self, tx_id: Id) -> Result<()> {
        let Some(mut node) = self.txs.remove(&tx_id) else {
            return Ok(());
        };
        node.tx.reject()?;
        self.tx_status.put(tx_id, Status::Rejected);
        trace!(tx = %tx_id, "rejected transaction");
        self.prune_conflict_set(node.conflict_set)
    }

    /// Drops rejected members from an undecided conflict set. The cell is
    /// rebuilt from the surviving members with fresh confidence.
    fn prune_conflict_set(&mut self, conflict_set: Id) -> Result<()> {
        let Some(snowball) = self.conflicts.get(&conflict_set) else {
            return Ok(());
        };
        let live: Vec<Id> = snowball
            .choices()
            .iter()
            .copied()
            .filter(|tx_id| self.txs.contains_key(tx_id))
            .collect();
        let Some(first) = live.first().copied() else {
            self.conflicts.remove(&conflict_set);
            return Ok(());
        };
        if snowball.finalized() || live.len() == snowball.choices().len() {
            return Ok(());
        }

        let preferred = if live.contains(&snowball.preference()) {
            snowball.preference()
        } else {
            first
        };
        let mut rebuilt = Nnary::new(&self.params, preferred);
        for tx_id in live {
            rebuilt.add(tx_id)?;
        }
        self.conflicts.insert(conflict_set, rebuilt);
        Ok(())
    }

    fn rebuild_children_index(&mut self) {
        self.children.clear();
        for (id, node) in &self.vertices {
            for parent in &node.parents {
                self.children.entry(*parent).or_default().push(*id);
            }
        }
    }
}

impl Consensus for Avalanche {
    type Item = dyn Vertex;

    fn add(&mut self, item: Box<dyn Vertex>) -> Result<()> {
        self.add_vertex(item)
    }

    fn record_poll(&mut self, votes: &Bag<Id>) -> Result<()> {
        self.apply_poll(votes)
    }

    fn finalized(&self) -> bool {
        self.vertices.is_empty()
    }

    /// The highest strongly preferred vertex, or the highest edge vertex.
    fn preference(&self) -> Id {
        let preferred = self
            .preferences()
            .iter()
            .filter_map(|id| self.vertices.get(id).map(|node| (node.height, *id)))
            .max();
        let edge = self.edge.iter().map(|(id, height)| (*height, *id)).max();
        preferred.or(edge).map_or(Id::EMPTY, |(_, id)| id)
    }

    fn ancestors(&self, id: &Id) -> Vec<Id> {
        let mut ancestors = Vec::new();
        let mut visited = Set::new();
        let mut stack = self
            .vertices
            .get(id)
            .map(|node| node.parents.clone())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if !visited.add(current) {
                continue;
            }
            if let Some(node) = self.vertices.get(&current) {
                ancestors.push(current);
                stack.extend(node.parents.iter().copied());
            }
        }
        ancestors
    }

    fn num_processing(&self) -> usize {
        self.vertices.len()
    }

    fn health_check(&self) -> Health {
        let oldest = self
            .vertices
            .values()
            .map(|node| node.added)
            .min()
            .map(|added| added.elapsed());
        Health::evaluate(&self.params, self.num_processing(), oldest)
    }
}
