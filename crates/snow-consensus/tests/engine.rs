//! Engine integration tests.
//!
//! Tests the engine against an in-memory network including:
//! - Agreement among several engines on a single block
//! - Convergence when engines start with conflicting preferences
//! - The background repoller lifecycle

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use snow_consensus::validators::Set as ValidatorSet;
use snow_consensus::{
    run_repoller, AcceptorGroup, Block, Consensus, ConsensusError, Context, Decidable,
    EarlyTermFactory, Engine, EngineConfig, EngineState, Message, NoEarlyTermFactory, Parameters,
    Result, Sender, Snowman, Status,
};
use snow_ids::{Id, NodeId};
use tokio::sync::broadcast;
use tokio::time::timeout;

const MAX_DELIVERIES: usize = 1_000_000;

fn make_id(byte: u8) -> Id {
    Id::from_bytes([byte; 32])
}

fn make_node_id(byte: u8) -> NodeId {
    NodeId::from_bytes([byte; 20])
}

#[derive(Clone)]
struct MockBlock {
    id: Id,
    parent: Id,
    height: u64,
}

impl MockBlock {
    fn new(id: Id, parent: Id, height: u64) -> Box<Self> {
        Box::new(Self { id, parent, height })
    }
}

impl Decidable for MockBlock {
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

impl Block for MockBlock {
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

/// Messages in flight, delivered one at a time in FIFO order.
#[derive(Default)]
struct Network {
    queue: Mutex<VecDeque<(NodeId, Message)>>,
}

struct RoutingSender {
    me: NodeId,
    network: Arc<Network>,
}

impl Sender for RoutingSender {
    fn send_pull_query(&self, nodes: &[NodeId], request_id: u32, container_id: Id) -> Result<()> {
        let mut queue = self.network.queue.lock();
        for node in nodes {
            queue.push_back((
                *node,
                Message::PullQuery {
                    node: self.me,
                    request_id,
                    container_id,
                },
            ));
        }
        Ok(())
    }

    fn send_chits(&self, node: NodeId, request_id: u32, preferred: Id) -> Result<()> {
        self.network.queue.lock().push_back((
            node,
            Message::Chits {
                node: self.me,
                request_id,
                preferred,
            },
        ));
        Ok(())
    }
}

struct Cluster {
    network: Arc<Network>,
    engines: HashMap<NodeId, Engine<Snowman>>,
}

impl Cluster {
    fn new(size: u8) -> Self {
        let params = Parameters::local();
        let validators = Arc::new(ValidatorSet::new());
        for i in 1..=size {
            validators.add(make_node_id(i), Vec::new(), 100).unwrap();
        }

        let network = Arc::new(Network::default());
        let mut engines = HashMap::new();
        for i in 1..=size {
            let me = make_node_id(i);
            let chain_id = make_id(200);
            let ctx = Context::new(chain_id, Arc::new(AcceptorGroup::new()));
            let snowman = Snowman::new(params, ctx, make_id(0), 0).unwrap();
            let config = EngineConfig {
                chain_id,
                params,
                validators: validators.clone(),
                sender: Arc::new(RoutingSender {
                    me,
                    network: network.clone(),
                }),
                poll_factory: Box::new(EarlyTermFactory::new(&params)),
                seed: Some(u64::from(i)),
            };
            let engine = Engine::new(config, snowman).unwrap();
            engine.transition(EngineState::Bootstrapping).unwrap();
            engine.transition(EngineState::NormalOp).unwrap();
            engines.insert(me, engine);
        }
        Self { network, engines }
    }

    fn engine(&self, i: u8) -> &Engine<Snowman> {
        &self.engines[&make_node_id(i)]
    }

    /// Delivers messages until the network is quiet.
    fn run(&self) {
        for _ in 0..MAX_DELIVERIES {
            let next = self.network.queue.lock().pop_front();
            let Some((to, message)) = next else {
                return;
            };
            self.engines[&to].handle(message).unwrap();
        }
        panic!("network did not quiesce");
    }
}

#[test]
fn engines_agree_on_single_block() {
    let cluster = Cluster::new(5);
    for i in 1..=5 {
        cluster
            .engine(i)
            .issue(MockBlock::new(make_id(1), make_id(0), 1))
            .unwrap();
    }

    cluster.run();

    for i in 1..=5 {
        let engine = cluster.engine(i);
        assert_eq!(
            engine.with_consensus(|snowman| snowman.status(&make_id(1))),
            Status::Accepted
        );
        assert!(engine.with_consensus(|snowman| snowman.finalized()));
        assert_eq!(engine.outstanding_polls(), 0);
    }
}

#[test]
fn engines_converge_on_conflicting_blocks() {
    let cluster = Cluster::new(5);
    let (a, b) = (make_id(1), make_id(2));
    for i in 1..=5 {
        // The first issued sibling is the initial preference.
        let order = if i <= 3 { [a, b] } else { [b, a] };
        for id in order {
            cluster
                .engine(i)
                .issue(MockBlock::new(id, make_id(0), 1))
                .unwrap();
        }
    }

    cluster.run();

    let decided = cluster
        .engine(1)
        .with_consensus(|snowman| snowman.last_accepted());
    assert!(decided.0 == a || decided.0 == b);
    let loser = if decided.0 == a { b } else { a };
    for i in 1..=5 {
        let engine = cluster.engine(i);
        assert_eq!(engine.with_consensus(|snowman| snowman.last_accepted()), decided);
        assert_eq!(
            engine.with_consensus(|snowman| snowman.status(&loser)),
            Status::Rejected
        );
    }
}

#[derive(Default)]
struct FlakySender {
    fail: AtomicBool,
    queries: Mutex<usize>,
}

impl Sender for FlakySender {
    fn send_pull_query(&self, _nodes: &[NodeId], _request_id: u32, _container_id: Id) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConsensusError::Network("unreachable".to_string()));
        }
        *self.queries.lock() += 1;
        Ok(())
    }

    fn send_chits(&self, _node: NodeId, _request_id: u32, _preferred: Id) -> Result<()> {
        Ok(())
    }
}

fn lone_engine(sender: Arc<FlakySender>) -> Arc<Engine<Snowman>> {
    let params = Parameters::local();
    let validators = Arc::new(ValidatorSet::new());
    validators.add(make_node_id(1), Vec::new(), 1).unwrap();
    let chain_id = make_id(200);
    let ctx = Context::new(chain_id, Arc::new(AcceptorGroup::new()));
    let snowman = Snowman::new(params, ctx, make_id(0), 0).unwrap();
    let config = EngineConfig {
        chain_id,
        params,
        validators,
        sender,
        poll_factory: Box::new(NoEarlyTermFactory),
        seed: None,
    };
    let engine = Engine::new(config, snowman).unwrap();
    engine.transition(EngineState::Bootstrapping).unwrap();
    engine.transition(EngineState::NormalOp).unwrap();
    Arc::new(engine)
}

#[tokio::test(start_paused = true)]
async fn repoller_stops_on_shutdown() {
    let engine = lone_engine(Arc::default());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(run_repoller(engine, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    let result = timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "repoller should shut down promptly");
}

#[tokio::test(start_paused = true)]
async fn repoller_exits_when_engine_halts() {
    let engine = lone_engine(Arc::default());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(run_repoller(engine.clone(), shutdown_rx));

    engine.transition(EngineState::Halted).unwrap();

    let result = timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "repoller should exit once the engine halts");
}

#[tokio::test(start_paused = true)]
async fn repoller_restores_polls_after_send_failure() {
    let sender = Arc::new(FlakySender::default());
    sender.fail.store(true, Ordering::SeqCst);
    let engine = lone_engine(sender.clone());

    assert!(matches!(
        engine.issue(MockBlock::new(make_id(1), make_id(0), 1)),
        Err(ConsensusError::Network(_))
    ));
    assert_eq!(engine.outstanding_polls(), 0);

    sender.fail.store(false, Ordering::SeqCst);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(run_repoller(engine.clone(), shutdown_rx));

    let interval = engine.with_consensus(|snowman| snowman.parameters().min_round_interval);
    tokio::time::sleep(interval * 3).await;

    assert_eq!(
        engine.outstanding_polls(),
        Parameters::local().concurrent_repolls
    );
    assert_eq!(*sender.queries.lock(), Parameters::local().concurrent_repolls);

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("repoller should shut down")
        .unwrap();
}
