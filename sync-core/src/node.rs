//! The process-scoped composition layer (spec.md §9): one [`Node`] per
//! process owns the hash ring, the Raft engine, the lock manager, the PBFT
//! engine, the coherent cache and the queue partitioner, constructed in
//! that dependency order and torn down in reverse.
//!
//! Mirrors the reference project's own `cluster::Cluster`/`server::Server`
//! split: a long-running driver thread per timer-driven engine (the Raft
//! election/heartbeat tick, the PBFT primary-timeout probe), started and
//! stopped through a small lifecycle signal bus built on [`broker::Broker`]
//! the same way `redisless::server::Server` starts and stops its listener
//! thread through its own `MPB<ServerState>` bus. Every other operation —
//! `acquire`, `produce`, `get`, `submit_pbft_request` — is a plain
//! synchronous call a transport handler (out of scope here) invokes
//! directly; none of them spawn anything.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};

use broker::Broker;
use hashring::Ring;
use pbft::{Executed, PbftError, PbftMessage, PbftNode, PbftOutbound, Sequence, View};
use raft::{
    InMemoryLog, LogEntry, LogIndex, Outbound as RaftOutbound, RaftConfig, RaftMessage, RaftNode,
    Term,
};

use crate::cache::{CacheMetricsSnapshot, CoherentCache, GetOutcome};
use crate::config::NodeConfig;
use crate::error::CoreError;
use crate::lock::{AcquireOutcome, LockCommand, LockManager, LockStatus, LockType};
use crate::queue::QueuePartitioner;
use crate::transport::{BackingSource, DurableListStore, PeerTransport};

/// A dispatch round that keeps re-sending and re-receiving Raft replies
/// (e.g. a leader retrying a rejected `AppendEntries` with a decremented
/// `next_index`) stops after this many rounds rather than spinning forever
/// against a persistently uncooperative peer.
const MAX_RAFT_DISPATCH_ROUNDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverSignal {
    Stop,
}

/// `{sequence, digest}` returned to a client submitting a PBFT request
/// (spec.md §6.1 "PBFT request" -> `{status, sequence, digest}`; `status` is
/// the transport layer's concern, not this core's).
#[derive(Debug, Clone)]
pub struct PbftSubmission {
    pub sequence: Sequence,
    pub digest: pbft::Hash,
}

/// `GET /pbft/status` (spec.md §6.1), minus the transport-level envelope.
#[derive(Debug, Clone)]
pub struct PbftStatusSnapshot {
    pub view: View,
    pub primary: String,
    pub is_primary: bool,
    pub last_executed: Sequence,
    pub executed_count: u64,
    pub byzantine_peers: Vec<String>,
}

/// `GET /metrics` (spec.md §6.1): the cache's own metrics plus enough Raft
/// and PBFT state for an operator to see both engines are alive.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub cache: CacheMetricsSnapshot,
    pub raft_term: Term,
    pub raft_is_leader: bool,
    pub raft_commit_index: LogIndex,
    pub pbft_view: View,
    pub pbft_last_executed: Sequence,
    pub pbft_executed_count: u64,
}

/// One coordination-plane process: the hash ring, the Raft-replicated lock
/// table, the PBFT three-phase engine, the coherent cache and the queue
/// partitioner, all owned here and driven through the `T`/`S`/`B`
/// collaborator traits (spec.md §6.3).
pub struct Node<T, S, B> {
    config: NodeConfig,
    ring: Arc<Ring>,
    raft: Mutex<RaftNode<InMemoryLog>>,
    locks: Mutex<LockManager>,
    pbft: Mutex<PbftNode>,
    cache: Mutex<CoherentCache<T>>,
    queue: QueuePartitioner<S, T>,
    transport: Arc<T>,
    backing: Arc<B>,
    /// Raft log index -> the channel an in-flight `acquire`/`release` call is
    /// blocked on, resolved once that index is applied to the lock table
    /// (spec.md §4.3: "only after commit does it reply").
    pending_locks: Mutex<HashMap<LogIndex, Sender<AcquireOutcome>>>,
    /// Requests this node has seen reach PBFT committed-local and apply, in
    /// sequence order. The spec treats the PBFT state machine as an opaque
    /// "abstract state-machine operation" (§2); this is that abstraction's
    /// one observable effect, enough to drive P1 (same request at the same
    /// sequence on every node) and `GET /pbft/status`.
    applied_pbft: Mutex<Vec<Executed>>,
    lifecycle: Broker<DriverSignal>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
    /// Set once an INVARIANT_VIOLATION is observed (spec.md §7: fatal,
    /// "the process must stop serving"). Every client-facing entry point
    /// checks this first and refuses once it is set; a supervisor is
    /// expected to restart the process rather than have it limp on.
    fatal: Mutex<Option<String>>,
}

impl<T, S, B> Node<T, S, B>
where
    T: PeerTransport + Send + Sync + 'static,
    S: DurableListStore + Send + Sync + 'static,
    B: BackingSource + Send + Sync + 'static,
{
    /// Constructs every component in the dependency order spec.md §9
    /// prescribes: hash ring, then Raft, then the lock manager, then PBFT,
    /// then cache/queue. Does not start any driver thread; call [`start`]
    /// for that.
    ///
    /// [`start`]: Node::start
    pub fn new(config: NodeConfig, transport: Arc<T>, store: Arc<S>, backing: Arc<B>) -> Arc<Self> {
        let ring = Arc::new(Ring::new(config.all_nodes.clone()));

        let raft_config = RaftConfig::new(
            config.election_timeout_min,
            config.election_timeout_max,
            config.heartbeat_interval,
        );
        let raft = RaftNode::new(
            config.node_id.clone(),
            config.peers(),
            InMemoryLog::new(),
            raft_config,
        );

        let locks = LockManager::new();

        let pbft = PbftNode::new(
            config.node_id.clone(),
            config.all_nodes.clone(),
            config.pbft_shared_secret,
        );

        let cache = CoherentCache::new(transport.clone(), config.cache_maxsize);
        let queue = QueuePartitioner::new(config.node_id.clone(), ring.clone(), store, transport.clone());

        Arc::new(Node {
            config,
            ring,
            raft: Mutex::new(raft),
            locks: Mutex::new(locks),
            pbft: Mutex::new(pbft),
            cache: Mutex::new(cache),
            queue,
            transport,
            backing,
            pending_locks: Mutex::new(HashMap::new()),
            applied_pbft: Mutex::new(Vec::new()),
            lifecycle: Broker::new(),
            drivers: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
        })
    }

    /// `Err` once this node has observed an INVARIANT_VIOLATION (spec.md
    /// §7); every client-facing entry point checks this before doing any
    /// work. Fatal, not retryable — a supervisor must restart the process.
    fn check_not_halted(&self) -> Result<(), CoreError> {
        match &*self.fatal.lock().unwrap() {
            Some(reason) => Err(CoreError::Invariant(reason.clone())),
            None => Ok(()),
        }
    }

    /// Records `reason` as this node's fatal state, if none is set yet, and
    /// returns the error every subsequent client-facing call will now see.
    fn halt(&self, reason: String) -> CoreError {
        let err = CoreError::invariant(reason.clone());
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(reason);
        }
        err
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    // ---- lifecycle -----------------------------------------------------

    /// Starts the two background driver tasks spec.md §5 calls for: the
    /// Raft election/heartbeat ticker and the PBFT primary-timeout probe
    /// (spec.md §9 "Timer-driven control flow -> explicit driver tasks").
    pub fn start(self: &Arc<Self>) {
        let mut drivers = self.drivers.lock().unwrap();

        let raft_node = self.clone();
        let raft_stop = self.lifecycle.subscribe();
        drivers.push(thread::spawn(move || raft_node.run_raft_driver(raft_stop)));

        let pbft_node = self.clone();
        let pbft_stop = self.lifecycle.subscribe();
        drivers.push(thread::spawn(move || pbft_node.run_pbft_driver(pbft_stop)));

        info!("[{}] node started", self.config.node_id);
    }

    /// Signals both driver threads to stop and joins them. Safe to call
    /// even if `start` was never called (the join list is simply empty).
    pub fn stop(self: &Arc<Self>) {
        let _ = self.lifecycle.tx().send(DriverSignal::Stop);
        let handles: Vec<JoinHandle<()>> = self.drivers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        info!("[{}] node stopped", self.config.node_id);
    }

    fn run_raft_driver(&self, stop: Receiver<DriverSignal>) {
        loop {
            match stop.recv_timeout(self.config.heartbeat_interval) {
                Ok(DriverSignal::Stop) => return,
                Err(RecvTimeoutError::Timeout) => self.drive_raft_tick(),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn run_pbft_driver(&self, stop: Receiver<DriverSignal>) {
        loop {
            match stop.recv_timeout(self.config.pbft_primary_timeout) {
                Ok(DriverSignal::Stop) => return,
                Err(RecvTimeoutError::Timeout) => {
                    self.pbft.lock().unwrap().primary_timeout();
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    // ---- Raft wiring ----------------------------------------------------

    /// One election/heartbeat tick: advance the local clock, then dispatch
    /// whatever `RequestVote`/`AppendEntries` traffic results.
    pub fn drive_raft_tick(&self) {
        let now = Instant::now();
        let out = self.raft.lock().unwrap().timer_tick(now);
        self.dispatch_raft(out);
    }

    pub fn is_leader(&self) -> bool {
        self.raft.lock().unwrap().is_leader()
    }

    pub fn leader_hint(&self) -> Option<String> {
        self.raft.lock().unwrap().leader_hint()
    }

    pub fn raft_term(&self) -> Term {
        self.raft.lock().unwrap().current_term()
    }

    pub fn raft_commit_index(&self) -> LogIndex {
        self.raft.lock().unwrap().commit_index()
    }

    /// Entry point for an inbound Raft peer RPC (spec.md §6.2
    /// `/raft/request-vote`, `/raft/append-entries`). `from` is this node's
    /// own identity is sent back inside the returned reply; a transport
    /// handler hands the reply straight back as the RPC's HTTP response.
    #[must_use = "the reply to `from` must be sent back as this RPC's response"]
    pub fn receive_raft(&self, from: &str, message: RaftMessage, now: Instant) -> Vec<RaftOutbound> {
        let out = self.raft.lock().unwrap().receive(from, message, now);
        self.apply_committed_locks();
        out
    }

    /// Sends every message in `outbound`, feeding each synchronous reply
    /// back into the Raft state machine and queuing whatever further
    /// traffic that produces — mirroring the way a real leader both sends
    /// `AppendEntries` and processes the response in one round-trip. Peer
    /// failures are absorbed here, not retried inline (spec.md §4.2
    /// "Failure semantics"): the next heartbeat or election tick retries.
    fn dispatch_raft(&self, outbound: Vec<RaftOutbound>) {
        let mut queue: VecDeque<RaftOutbound> = outbound.into();
        let mut rounds = 0;
        while let Some(msg) = queue.pop_front() {
            rounds += 1;
            if rounds > MAX_RAFT_DISPATCH_ROUNDS {
                warn!(
                    "[{}] raft dispatch exceeded {} rounds this tick, deferring the rest",
                    self.config.node_id, MAX_RAFT_DISPATCH_ROUNDS
                );
                break;
            }
            match self
                .transport
                .send_raft(&msg.to, msg.message, self.config.peer_rpc_timeout)
            {
                Ok(reply) => {
                    let now = Instant::now();
                    let further = self.raft.lock().unwrap().receive(&msg.to, reply, now);
                    queue.extend(further);
                }
                Err(_) => {}
            }
        }
        self.apply_committed_locks();
    }

    /// Applies every newly committed Raft entry to the lock table, in
    /// order, and wakes any `acquire`/`release` call blocked on that index
    /// (spec.md §4.2 "State-machine application").
    ///
    /// An undecodable entry is an INVARIANT_VIOLATION (spec.md §7): every
    /// entry in this log was encoded by `LockCommand::encode` on some node
    /// in this cluster, so failing to decode one means the log itself has
    /// diverged from what this state machine expects. That is fatal — this
    /// halts the node (no further entry in this batch or any later one is
    /// applied) rather than logging it and pressing on with a state machine
    /// that may now disagree with the rest of the cluster.
    fn apply_committed_locks(&self) {
        if self.check_not_halted().is_err() {
            return;
        }
        let entries = self.raft.lock().unwrap().take_newly_committed();
        if entries.is_empty() {
            return;
        }
        let mut locks = self.locks.lock().unwrap();
        let mut pending = self.pending_locks.lock().unwrap();
        for entry in entries {
            match LockCommand::decode(&entry.command) {
                Ok(command) => {
                    let outcome = locks.apply(&command);
                    if let Some(tx) = pending.remove(&entry.index) {
                        let _ = tx.send(outcome);
                    }
                }
                Err(err) => {
                    self.halt(format!(
                        "committed entry at index {} is not a valid LockCommand: {err}",
                        entry.index
                    ));
                    return;
                }
            }
        }
    }

    // ---- Lock manager client surface ------------------------------------

    /// `POST /lock/{name}` (spec.md §6.1, §4.3). Leader-only: a non-leader
    /// fails TRANSIENT with the known leader as a hint, per spec.md §4.3
    /// "a non-leader forwards... or returns a retryable error".
    pub fn acquire(&self, name: &str, lock_type: LockType, requester: &str) -> Result<AcquireOutcome, CoreError> {
        self.check_not_halted()?;
        let command = {
            let locks = self.locks.lock().unwrap();
            locks.plan_acquire(name, lock_type, requester)?
        };
        self.propose_and_wait(command)
    }

    /// `DELETE /lock/{name}` (spec.md §6.1, §4.3).
    pub fn release(&self, name: &str, requester: &str) -> Result<(), CoreError> {
        self.check_not_halted()?;
        let command = {
            let locks = self.locks.lock().unwrap();
            locks.plan_release(name, requester)?
        };
        self.propose_and_wait(command).map(|_| ())
    }

    fn propose_and_wait(&self, command: LockCommand) -> Result<AcquireOutcome, CoreError> {
        let (index, immediate_out) = {
            let mut raft = self.raft.lock().unwrap();
            let index = raft.propose(command.encode()).map_err(|err| {
                CoreError::transient_with_hint(err.to_string(), raft.leader_hint())
            })?;
            (index, raft.replicate_now())
        };

        let (tx, rx) = bounded(1);
        self.pending_locks.lock().unwrap().insert(index, tx);
        self.dispatch_raft(immediate_out);

        match rx.recv_timeout(self.config.peer_rpc_timeout) {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                self.pending_locks.lock().unwrap().remove(&index);
                Err(CoreError::transient(format!(
                    "log index {index} did not commit before the peer RPC deadline"
                )))
            }
        }
    }

    pub fn lock_status(&self, name: &str) -> Option<LockStatus> {
        self.locks.lock().unwrap().status(name)
    }

    /// `GET /locks` (spec.md §6.1): every lock, plus leadership state and
    /// the derived wait-for graph.
    pub fn list_locks(&self) -> Vec<(String, LockStatus)> {
        self.locks.lock().unwrap().list()
    }

    pub fn wait_for_graph(&self) -> Vec<(String, String)> {
        self.locks.lock().unwrap().wait_for_graph()
    }

    // ---- Queue client surface -------------------------------------------

    pub fn produce(&self, queue_name: &str, message: Vec<u8>) -> Result<(), CoreError> {
        self.queue.produce(queue_name, message, self.config.peer_rpc_timeout)
    }

    pub fn consume(&self, queue_name: &str) -> Result<Option<Vec<u8>>, CoreError> {
        self.queue.consume(queue_name, self.config.peer_rpc_timeout)
    }

    pub fn ack(&self, processing_key: &str, message: Vec<u8>) -> Result<(), CoreError> {
        self.queue.ack(processing_key, message, self.config.peer_rpc_timeout)
    }

    // ---- Cache client surface --------------------------------------------

    pub fn cache_get(&self, key: &str) -> (GetOutcome, Option<Vec<u8>>) {
        self.cache.lock().unwrap().get(key, self.backing.as_ref())
    }

    pub fn cache_put(&self, key: &str, value: Vec<u8>) {
        self.cache.lock().unwrap().put(key, value);
    }

    /// `POST /cache/invalidate/{key}` (spec.md §6.2), invoked by a peer's
    /// `put` broadcast.
    pub fn cache_invalidate(&self, key: &str) {
        self.cache.lock().unwrap().invalidate(key);
    }

    pub fn cache_metrics(&self) -> CacheMetricsSnapshot {
        self.cache.lock().unwrap().metrics()
    }

    // ---- PBFT client surface ---------------------------------------------

    /// `POST /pbft/request` (spec.md §6.1). Primary-only: the spec's peer-RPC
    /// contract (§6.2) has no "forward a raw client submission to the
    /// primary" message, so a non-primary fails TRANSIENT with the primary
    /// as a hint, the same shape as the lock manager's leader redirect.
    pub fn submit_pbft_request(&self, request: Vec<u8>) -> Result<PbftSubmission, CoreError> {
        let outbound = {
            let mut pbft = self.pbft.lock().unwrap();
            pbft.submit_request(request)
                .map_err(|PbftError::NotPrimary { primary, .. }| {
                    CoreError::transient_with_hint("not the pbft primary for this view", Some(primary))
                })?
        };
        let submission = outbound
            .first()
            .map(|o| PbftSubmission {
                sequence: o.message.sequence,
                digest: o.message.digest,
            })
            .expect("submit_request always emits at least the pre-prepare");
        self.dispatch_pbft(outbound);
        Ok(submission)
    }

    /// `POST /pbft/message` (spec.md §6.2): an inbound PRE_PREPARE, PREPARE
    /// or COMMIT from a peer.
    pub fn receive_pbft(&self, message: PbftMessage) {
        let outbound = self.pbft.lock().unwrap().receive(message);
        self.dispatch_pbft(outbound);
    }

    fn dispatch_pbft(&self, outbound: Vec<PbftOutbound>) {
        for item in &outbound {
            for peer in self.config.peers() {
                let _ = self
                    .transport
                    .send_pbft(&peer, item.message.clone(), self.config.peer_rpc_timeout);
            }
        }
        self.drain_executed();
    }

    fn drain_executed(&self) {
        let executed = self.pbft.lock().unwrap().take_executed();
        if executed.is_empty() {
            return;
        }
        let mut applied = self.applied_pbft.lock().unwrap();
        for item in executed {
            info!(
                "[{}] pbft applied sequence {} ({} request bytes)",
                self.config.node_id,
                item.sequence,
                item.request.len()
            );
            applied.push(item);
        }
    }

    /// Every request this node has seen reach committed-local and apply, in
    /// sequence order — the observable trace of PBFT's abstract state
    /// machine (spec.md §2, invariant P1).
    pub fn applied_pbft_requests(&self) -> Vec<Executed> {
        self.applied_pbft.lock().unwrap().clone()
    }

    /// `GET /pbft/status` (spec.md §6.1).
    pub fn pbft_status(&self) -> PbftStatusSnapshot {
        let pbft = self.pbft.lock().unwrap();
        let byzantine_peers = self
            .config
            .peers()
            .into_iter()
            .filter(|peer| pbft.is_byzantine(peer))
            .collect();
        PbftStatusSnapshot {
            view: pbft.view(),
            primary: pbft.primary().to_string(),
            is_primary: pbft.is_primary(),
            last_executed: pbft.last_executed(),
            executed_count: pbft.executed_count(),
            byzantine_peers,
        }
    }

    // ---- Aggregate metrics ------------------------------------------------

    /// `GET /metrics` (spec.md §6.1).
    pub fn metrics(&self) -> MetricsSnapshot {
        let raft = self.raft.lock().unwrap();
        let pbft = self.pbft.lock().unwrap();
        MetricsSnapshot {
            cache: self.cache.lock().unwrap().metrics(),
            raft_term: raft.current_term(),
            raft_is_leader: raft.is_leader(),
            raft_commit_index: raft.commit_index(),
            pbft_view: pbft.view(),
            pbft_last_executed: pbft.last_executed(),
            pbft_executed_count: pbft.executed_count(),
        }
    }
}

