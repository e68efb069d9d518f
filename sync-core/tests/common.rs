//! In-process cluster harness for `sync-core` integration tests, the same
//! role `raft/tests/common.rs`'s `Group` and `pbft/tests/common.rs`'s
//! `Cluster` play for their own crates: wire several real [`Node`]s together
//! through a transport that calls straight into the sibling `Node` rather
//! than a socket.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pbft::PbftMessage;
use raft::RaftMessage;

use sync_core::config::NodeConfig;
use sync_core::error::CoreError;
use sync_core::node::Node;
use sync_core::transport::{
    BackingSource, DurableListStore, InMemoryBackingSource, InMemoryListStore, PeerTransport,
};

pub type TestNode = Node<FakeTransport, InMemoryListStore, InMemoryBackingSource>;

type Registry = Arc<Mutex<HashMap<String, Arc<TestNode>>>>;

/// Routes `PeerTransport` calls directly into sibling `Node`s registered in
/// the same process, standing in for the HTTP layer spec.md leaves external
/// (spec.md §6.2, §9 "External wiring").
pub struct FakeTransport {
    self_id: String,
    registry: Registry,
}

impl FakeTransport {
    fn peer(&self, id: &str) -> Result<Arc<TestNode>, CoreError> {
        self.registry
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::transient(format!("no such peer {id} in this cluster")))
    }
}

impl PeerTransport for FakeTransport {
    fn send_raft(&self, to: &str, msg: RaftMessage, _deadline: Duration) -> Result<RaftMessage, CoreError> {
        let target = self.peer(to)?;
        let mut out = target.receive_raft(&self.self_id, msg, Instant::now());
        // `receive_raft` on a request message (RequestVote/AppendEntries)
        // always produces exactly one reply addressed back to `self_id`.
        match out.iter().position(|o| o.to == self.self_id) {
            Some(i) => Ok(out.remove(i).message),
            None => Err(CoreError::transient(format!(
                "{to} produced no reply to {}",
                self.self_id
            ))),
        }
    }

    fn send_pbft(&self, to: &str, msg: PbftMessage, _deadline: Duration) -> Result<(), CoreError> {
        let target = self.peer(to)?;
        target.receive_pbft(msg);
        Ok(())
    }

    fn broadcast_invalidate(&self, key: &str) {
        let peers: Vec<Arc<TestNode>> = self
            .registry
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| **id != self.self_id)
            .map(|(_, node)| node.clone())
            .collect();
        for peer in peers {
            peer.cache_invalidate(key);
        }
    }

    fn forward_produce(&self, to: &str, queue: &str, message: Vec<u8>, _deadline: Duration) -> Result<(), CoreError> {
        self.peer(to)?.produce(queue, message)
    }

    fn forward_consume(&self, to: &str, queue: &str, _deadline: Duration) -> Result<Option<Vec<u8>>, CoreError> {
        self.peer(to)?.consume(queue)
    }

    fn forward_ack(&self, to: &str, processing_key: &str, message: Vec<u8>, _deadline: Duration) -> Result<(), CoreError> {
        self.peer(to)?.ack(processing_key, message)
    }
}

/// A cluster of `node_ids.len()` real `Node`s, all sharing one `FakeTransport`
/// registry. Raft/PBFT timers are never started as background threads here
/// (`Node::start` is untouched); tests drive ticks explicitly so failures are
/// deterministic to reproduce instead of racing a real clock.
pub struct Cluster {
    pub nodes: HashMap<String, Arc<TestNode>>,
    order: Vec<String>,
}

impl Cluster {
    pub fn new(node_ids: &[&str]) -> Self {
        Self::with_backing(node_ids, HashMap::new())
    }

    pub fn with_backing(node_ids: &[&str], backing_data: HashMap<String, Vec<u8>>) -> Self {
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let all: Vec<String> = node_ids.iter().map(|s| s.to_string()).collect();
        let mut nodes = HashMap::new();

        for id in &all {
            let mut config = NodeConfig::new(id.clone(), all.clone());
            config.election_timeout_min = Duration::from_millis(50);
            config.election_timeout_max = Duration::from_millis(120);
            config.heartbeat_interval = Duration::from_millis(10);
            config.peer_rpc_timeout = Duration::from_millis(300);
            config.cache_maxsize = 4;

            let transport = Arc::new(FakeTransport {
                self_id: id.clone(),
                registry: registry.clone(),
            });
            let store = Arc::new(InMemoryListStore::new());
            let backing = Arc::new(InMemoryBackingSource::new(backing_data.clone()));
            let node = Node::new(config, transport, store, backing);
            registry.lock().unwrap().insert(id.clone(), node.clone());
            nodes.insert(id.clone(), node);
        }

        Cluster { nodes, order: all }
    }

    pub fn node(&self, id: &str) -> Arc<TestNode> {
        self.nodes.get(id).unwrap_or_else(|| panic!("no node {id} in cluster")).clone()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Ticks every node's Raft driver, in cluster order, `rounds` times.
    pub fn tick_raft(&self, rounds: u32) {
        for _ in 0..rounds {
            for id in &self.order {
                self.node(id).drive_raft_tick();
            }
        }
    }

    /// Ticks Raft, with a short real sleep between rounds, until some node
    /// believes it is leader or `timeout` real time elapses. A real sleep is
    /// unavoidable here: the election timers measure real `Instant`s, so a
    /// busy loop with no elapsed wall time never fires one.
    pub fn elect_leader(&self, timeout: Duration) -> Option<String> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            self.tick_raft(1);
            if let Some(id) = self.order.iter().find(|id| self.node(id).is_leader()) {
                return Some(id.clone());
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    pub fn leader(&self) -> Option<Arc<TestNode>> {
        self.order.iter().map(|id| self.node(id)).find(|n| n.is_leader())
    }
}
