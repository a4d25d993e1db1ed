//! Consensus engine state machine.
//!
//! The engine drives one consensus instance: it samples validators, sends
//! queries through a [`Sender`], feeds the answers into a [`poll::Set`] and
//! applies every finished poll to the instance.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use snow_ids::{Id, NodeId};
use snow_utils::Bag;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::consensus::{Consensus, Health};
use crate::poll::{self, PollFactory};
use crate::validators;
use crate::{ConsensusError, Parameters, Result};

/// State of the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Initial state, not yet started
    Initializing,
    /// Bootstrapping from network
    Bootstrapping,
    /// Normal consensus operation
    NormalOp,
    /// Engine is halted
    Halted,
}

impl EngineState {
    fn can_transition(self, next: EngineState) -> bool {
        matches!(
            (self, next),
            (EngineState::Initializing, EngineState::Bootstrapping)
                | (EngineState::Bootstrapping, EngineState::NormalOp)
                | (
                    EngineState::Initializing | EngineState::Bootstrapping | EngineState::NormalOp,
                    EngineState::Halted
                )
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Initializing => write!(f, "Initializing"),
            EngineState::Bootstrapping => write!(f, "Bootstrapping"),
            EngineState::NormalOp => write!(f, "NormalOp"),
            EngineState::Halted => write!(f, "Halted"),
        }
    }
}

/// Outbound half of the network layer.
pub trait Sender: Send + Sync {
    /// Asks `nodes` which container they prefer, naming ours.
    fn send_pull_query(&self, nodes: &[NodeId], request_id: u32, container_id: Id) -> Result<()>;

    /// Answers a query with our preference.
    fn send_chits(&self, node: NodeId, request_id: u32, preferred: Id) -> Result<()>;
}

/// Inbound messages the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    PullQuery {
        node: NodeId,
        request_id: u32,
        container_id: Id,
    },
    Chits {
        node: NodeId,
        request_id: u32,
        preferred: Id,
    },
    /// The query timed out or the node could not be reached
    QueryFailed { node: NodeId, request_id: u32 },
    Connected { node: NodeId },
    Disconnected { node: NodeId },
    Gossip { container_id: Id },
}

/// Everything an [`Engine`] needs besides its consensus instance.
pub struct EngineConfig {
    pub chain_id: Id,
    pub params: Parameters,
    pub validators: Arc<validators::Set>,
    pub sender: Arc<dyn Sender>,
    pub poll_factory: Box<dyn PollFactory>,
    /// Seed for validator sampling; `None` seeds from the OS
    pub seed: Option<u64>,
}

/// The consensus engine manages consensus lifecycle.
pub struct Engine<C: Consensus> {
    chain_id: Id,
    params: Parameters,
    state: RwLock<EngineState>,
    consensus: RwLock<C>,
    validators: Arc<validators::Set>,
    sender: Arc<dyn Sender>,
    polls: poll::Set,
    rng: Mutex<StdRng>,
    next_request_id: AtomicU32,
}

impl<C: Consensus> Engine<C> {
    /// Creates a new engine in the `Initializing` state.
    pub fn new(config: EngineConfig, consensus: C) -> Result<Self> {
        config.params.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            chain_id: config.chain_id,
            params: config.params,
            state: RwLock::new(EngineState::Initializing),
            consensus: RwLock::new(consensus),
            validators: config.validators,
            sender: config.sender,
            polls: poll::Set::new(config.poll_factory),
            rng: Mutex::new(rng),
            next_request_id: AtomicU32::new(0),
        })
    }

    pub fn chain_id(&self) -> Id {
        self.chain_id
    }

    /// Returns the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Transitions to a new state.
    pub fn transition(&self, next: EngineState) -> Result<()> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition(next) {
            return Err(ConsensusError::InvalidState {
                expected: format!("valid transition from {current}"),
                actual: format!("{current} -> {next}"),
            });
        }
        *state = next;
        info!(chain_id = %self.chain_id, "engine {current} -> {next}");
        Ok(())
    }

    /// Runs `f` against the consensus instance.
    pub fn with_consensus<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.consensus.read())
    }

    pub fn health_check(&self) -> Health {
        self.consensus.read().health_check()
    }

    /// Number of polls awaiting answers.
    pub fn outstanding_polls(&self) -> usize {
        self.polls.len()
    }

    /// Issues a new container and starts polling for it.
    ///
    /// A container that fails verification is returned as an error and the
    /// engine keeps running.
    pub fn issue(&self, item: Box<C::Item>) -> Result<()> {
        self.require_state(EngineState::NormalOp)?;
        {
            let mut consensus = self.consensus.write();
            if consensus.num_processing() >= self.params.max_outstanding_items {
                return Err(ConsensusError::TooManyProcessing {
                    limit: self.params.max_outstanding_items,
                });
            }
            consensus.add(item)?;
        }
        self.repoll()
    }

    /// Dispatches an inbound message.
    pub fn handle(&self, message: Message) -> Result<()> {
        if self.state() == EngineState::Halted {
            trace!(?message, "dropping message on halted engine");
            return Ok(());
        }
        match message {
            Message::PullQuery {
                node,
                request_id,
                container_id,
            } => self.pull_query(node, request_id, container_id),
            Message::Chits {
                node,
                request_id,
                preferred,
            } => self.chits(node, request_id, preferred),
            Message::QueryFailed { node, request_id } => self.query_failed(node, request_id),
            other @ (Message::Connected { .. }
            | Message::Disconnected { .. }
            | Message::Gossip { .. }) => {
                trace!(message = ?other, "ignored");
                Ok(())
            }
        }
    }

    /// Answers a peer's query with our current preference.
    pub fn pull_query(&self, node: NodeId, request_id: u32, container_id: Id) -> Result<()> {
        let preferred = self.consensus.read().preference();
        trace!(%node, request_id, %container_id, %preferred, "answering query");
        self.sender.send_chits(node, request_id, preferred)
    }

    /// Records a peer's answer to one of our queries.
    ///
    /// The consensus lock is held from the vote until the released polls are
    /// applied, so polls reach the instance in the order they were issued.
    pub fn chits(&self, node: NodeId, request_id: u32, preferred: Id) -> Result<()> {
        {
            let mut consensus = self.consensus.write();
            let ancestors = consensus.ancestors(&preferred);
            let results = self
                .polls
                .vote_with_ancestors(request_id, node, preferred, &ancestors);
            self.apply(&mut consensus, results)?;
        }
        self.repoll()
    }

    /// Gives up on a peer's answer.
    pub fn query_failed(&self, node: NodeId, request_id: u32) -> Result<()> {
        {
            let mut consensus = self.consensus.write();
            let results = self.polls.drop(request_id, node);
            self.apply(&mut consensus, results)?;
        }
        self.repoll()
    }

    /// Starts polls until `concurrent_repolls` are outstanding, as long as
    /// something is still processing.
    pub fn repoll(&self) -> Result<()> {
        if self.state() != EngineState::NormalOp {
            return Ok(());
        }
        for _ in self.polls.len()..self.params.concurrent_repolls {
            if self.consensus.read().finalized() {
                break;
            }
            self.send_query()?;
        }
        Ok(())
    }

    fn send_query(&self) -> Result<()> {
        let preference = self.consensus.read().preference();
        let voters = {
            let mut rng = self.rng.lock();
            self.validators.sample_k(self.params.k, &mut *rng)?
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut nodes = voters.list();
        nodes.sort();

        if !self.polls.add(request_id, voters) {
            warn!(request_id, "request ID already in use");
            return Ok(());
        }
        debug!(request_id, %preference, nodes = nodes.len(), "sending query");

        if let Err(err) = self.sender.send_pull_query(&nodes, request_id, preference) {
            warn!(request_id, %err, "failed to send query");
            let mut consensus = self.consensus.write();
            for node in &nodes {
                let results = self.polls.drop(request_id, *node);
                self.apply(&mut consensus, results)?;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Applies finished polls; any failure halts the engine.
    fn apply(&self, consensus: &mut C, results: Vec<Bag<Id>>) -> Result<()> {
        for votes in results {
            if let Err(err) = consensus.record_poll(&votes) {
                error!(chain_id = %self.chain_id, %err, "halting engine");
                *self.state.write() = EngineState::Halted;
                return Err(err);
            }
        }
        Ok(())
    }

    fn require_state(&self, required: EngineState) -> Result<()> {
        let current = *self.state.read();
        if current != required {
            Err(ConsensusError::InvalidState {
                expected: required.to_string(),
                actual: current.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Repolls every `min_round_interval` until shutdown or until the engine halts.
pub async fn run_repoller<C: Consensus>(
    engine: Arc<Engine<C>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(engine.params.min_round_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.recv() => {
                debug!(chain_id = %engine.chain_id, "repoller shutting down");
                return;
            }
        }

        match engine.state() {
            EngineState::Halted => {
                debug!(chain_id = %engine.chain_id, "engine halted, repoller exiting");
                return;
            }
            EngineState::NormalOp => {
                if let Err(err) = engine.repoll() {
                    warn!(chain_id = %engine.chain_id, %err, "repoll failed");
                }
            }
            EngineState::Initializing | EngineState::Bootstrapping => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::acceptor::AcceptorGroup;
    use crate::consensus::snowman::{Block, Snowman};
    use crate::consensus::{Context, Decidable, Status};
    use crate::poll::NoEarlyTermFactory;

    fn make_node_id(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 20])
    }

    fn make_id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    #[derive(Default)]
    struct RecordingSender {
        queries: Mutex<Vec<(Vec<NodeId>, u32, Id)>>,
        chits: Mutex<Vec<(NodeId, u32, Id)>>,
        fail: AtomicBool,
    }

    impl Sender for RecordingSender {
        fn send_pull_query(&self, nodes: &[NodeId], request_id: u32, container_id: Id) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConsensusError::Network("connection reset".to_string()));
            }
            self.queries
                .lock()
                .push((nodes.to_vec(), request_id, container_id));
            Ok(())
        }

        fn send_chits(&self, node: NodeId, request_id: u32, preferred: Id) -> Result<()> {
            self.chits.lock().push((node, request_id, preferred));
            Ok(())
        }
    }

    struct TestBlock {
        id: Id,
        parent: Id,
        height: u64,
    }

    impl Decidable for TestBlock {
        fn id(&self) -> Id {
            self.id
        }

        fn status(&self) -> Status {
            Status::Processing
        }

        fn bytes(&self) -> &[u8] {
            self.id.as_bytes()
        }

        fn accept(&mut self) -> Result<()> {
            Ok(())
        }

        fn reject(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Block for TestBlock {
        fn parent(&self) -> Id {
            self.parent
        }

        fn height(&self) -> u64 {
            self.height
        }

        fn verify(&self) -> Result<()> {
            Ok(())
        }
    }

    fn block(id: u8, parent: u8, height: u64) -> Box<TestBlock> {
        Box::new(TestBlock {
            id: make_id(id),
            parent: make_id(parent),
            height,
        })
    }

    fn create_validator_set(count: u8) -> Arc<validators::Set> {
        let set = validators::Set::new();
        for i in 1..=count {
            set.add(make_node_id(i), Vec::new(), 100).unwrap();
        }
        Arc::new(set)
    }

    fn new_engine(params: Parameters, sender: Arc<RecordingSender>) -> Engine<Snowman> {
        let chain_id = make_id(200);
        let ctx = Context::new(chain_id, Arc::new(AcceptorGroup::new()));
        let snowman = Snowman::new(params, ctx, make_id(0), 0).unwrap();
        let config = EngineConfig {
            chain_id,
            params,
            validators: create_validator_set(5),
            sender,
            poll_factory: Box::new(NoEarlyTermFactory),
            seed: Some(7),
        };
        Engine::new(config, snowman).unwrap()
    }

    fn running_engine(sender: Arc<RecordingSender>) -> Engine<Snowman> {
        let engine = new_engine(Parameters::local(), sender);
        engine.transition(EngineState::Bootstrapping).unwrap();
        engine.transition(EngineState::NormalOp).unwrap();
        engine
    }

    #[test]
    fn test_engine_state_transitions() {
        let engine = new_engine(Parameters::local(), Arc::default());
        assert_eq!(engine.state(), EngineState::Initializing);

        assert!(engine.transition(EngineState::NormalOp).is_err());
        engine.transition(EngineState::Bootstrapping).unwrap();
        engine.transition(EngineState::NormalOp).unwrap();
        assert!(engine.transition(EngineState::Bootstrapping).is_err());
        engine.transition(EngineState::Halted).unwrap();
        assert_eq!(engine.state(), EngineState::Halted);
        assert!(engine.transition(EngineState::Halted).is_err());
    }

    #[test]
    fn test_issue_requires_normal_op() {
        let engine = new_engine(Parameters::local(), Arc::default());
        assert!(matches!(
            engine.issue(block(1, 0, 1)),
            Err(ConsensusError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_issue_starts_polls() {
        let sender = Arc::new(RecordingSender::default());
        let engine = running_engine(sender.clone());

        engine.issue(block(1, 0, 1)).unwrap();

        let queries = sender.queries.lock();
        assert_eq!(queries.len(), Parameters::local().concurrent_repolls);
        assert_eq!(engine.outstanding_polls(), queries.len());
        for (nodes, _, container_id) in queries.iter() {
            assert!(!nodes.is_empty());
            assert_eq!(*container_id, make_id(1));
        }
    }

    #[test]
    fn test_chits_decide_block() {
        let sender = Arc::new(RecordingSender::default());
        let engine = running_engine(sender.clone());
        engine.issue(block(1, 0, 1)).unwrap();

        loop {
            let queries: Vec<_> = sender.queries.lock().drain(..).collect();
            if queries.is_empty() {
                break;
            }
            for (nodes, request_id, _) in queries {
                for node in nodes {
                    engine.chits(node, request_id, make_id(1)).unwrap();
                }
            }
        }

        assert_eq!(
            engine.with_consensus(|snowman| snowman.status(&make_id(1))),
            Status::Accepted
        );
        assert!(engine.with_consensus(|snowman| snowman.finalized()));
        assert_eq!(engine.outstanding_polls(), 0);
    }

    #[test]
    fn test_too_many_processing() {
        let sender = Arc::new(RecordingSender::default());
        let params = Parameters {
            max_outstanding_items: 1,
            ..Parameters::local()
        };
        let engine = new_engine(params, sender);
        engine.transition(EngineState::Bootstrapping).unwrap();
        engine.transition(EngineState::NormalOp).unwrap();

        engine.issue(block(1, 0, 1)).unwrap();
        assert_eq!(
            engine.issue(block(2, 1, 2)),
            Err(ConsensusError::TooManyProcessing { limit: 1 })
        );
    }

    #[test]
    fn test_send_failure_drops_poll() {
        let sender = Arc::new(RecordingSender::default());
        sender.fail.store(true, Ordering::SeqCst);
        let engine = running_engine(sender.clone());

        assert!(matches!(
            engine.issue(block(1, 0, 1)),
            Err(ConsensusError::Network(_))
        ));
        assert_eq!(engine.outstanding_polls(), 0);
        assert_eq!(engine.state(), EngineState::NormalOp);
        assert_eq!(
            engine.with_consensus(|snowman| snowman.status(&make_id(1))),
            Status::Processing
        );

        sender.fail.store(false, Ordering::SeqCst);
        engine.repoll().unwrap();
        assert_eq!(engine.outstanding_polls(), Parameters::local().concurrent_repolls);
    }

    #[test]
    fn test_pull_query_answers_preference() {
        let sender = Arc::new(RecordingSender::default());
        let engine = running_engine(sender.clone());
        engine.issue(block(1, 0, 1)).unwrap();

        engine
            .handle(Message::PullQuery {
                node: make_node_id(9),
                request_id: 42,
                container_id: make_id(0),
            })
            .unwrap();
        assert_eq!(
            *sender.chits.lock(),
            vec![(make_node_id(9), 42, make_id(1))]
        );
    }

    #[test]
    fn test_noop_messages() {
        let engine = running_engine(Arc::default());
        engine
            .handle(Message::Connected {
                node: make_node_id(1),
            })
            .unwrap();
        engine
            .handle(Message::Gossip {
                container_id: make_id(1),
            })
            .unwrap();
        assert_eq!(engine.state(), EngineState::NormalOp);
    }

    #[test]
    fn test_query_failed_finishes_poll() {
        let sender = Arc::new(RecordingSender::default());
        let engine = running_engine(sender.clone());
        engine.issue(block(1, 0, 1)).unwrap();

        let (nodes, request_id, _) = sender.queries.lock()[0].clone();
        for node in nodes {
            engine
                .handle(Message::QueryFailed { node, request_id })
                .unwrap();
        }
        // The finished poll is replaced by a new one.
        assert_eq!(engine.outstanding_polls(), Parameters::local().concurrent_repolls);
        assert_eq!(sender.queries.lock().len(), Parameters::local().concurrent_repolls + 1);
    }

    /// Never finalizes and logs the top choice of every applied poll.
    #[derive(Default)]
    struct PollLog {
        applied: Vec<Id>,
    }

    impl Consensus for PollLog {
        type Item = TestBlock;

        fn add(&mut self, _item: Box<TestBlock>) -> Result<()> {
            Ok(())
        }

        fn record_poll(&mut self, votes: &Bag<Id>) -> Result<()> {
            if let Some((choice, _)) = votes.mode() {
                self.applied.push(choice);
            }
            Ok(())
        }

        fn finalized(&self) -> bool {
            false
        }

        fn preference(&self) -> Id {
            make_id(0)
        }

        fn ancestors(&self, _id: &Id) -> Vec<Id> {
            Vec::new()
        }

        fn num_processing(&self) -> usize {
            1
        }

        fn health_check(&self) -> Health {
            Health {
                processing: 1,
                oldest_processing: None,
                healthy: true,
            }
        }
    }

    #[test]
    fn test_concurrent_chits_apply_polls_in_issue_order() {
        let sender = Arc::new(RecordingSender::default());
        let params = Parameters::local();
        let config = EngineConfig {
            chain_id: make_id(200),
            params,
            validators: create_validator_set(5),
            sender: sender.clone(),
            poll_factory: Box::new(NoEarlyTermFactory),
            seed: Some(7),
        };
        let engine = Engine::new(config, PollLog::default()).unwrap();
        engine.transition(EngineState::Bootstrapping).unwrap();
        engine.transition(EngineState::NormalOp).unwrap();
        engine.repoll().unwrap();

        let queries: Vec<_> = sender.queries.lock().drain(..).collect();
        assert_eq!(queries.len(), params.concurrent_repolls);

        // Every poll is answered on its own thread, later polls first.
        std::thread::scope(|scope| {
            for (i, (nodes, request_id, _)) in queries.iter().enumerate().rev() {
                let engine = &engine;
                scope.spawn(move || {
                    for node in nodes {
                        engine.chits(*node, *request_id, make_id(100 + i as u8)).unwrap();
                    }
                });
            }
        });

        let expected: Vec<Id> = (0..queries.len()).map(|i| make_id(100 + i as u8)).collect();
        let applied = engine.with_consensus(|log| log.applied.clone());
        assert_eq!(applied, expected);
    }
}
