//! Core PBFT three-phase state machine (spec.md §4.4).
//!
//! Like `raft::state`, this is a pure, synchronously-driven state machine:
//! no I/O, no threads, no clocks of its own beyond what the caller feeds in
//! via `primary_timeout`. All effects are returned as outbound messages.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use thiserror::Error;

use crate::message::{digest, tag, Hash, PbftKind, PbftMessage, PbftOutbound, Sequence, View};

/// A node is flagged Byzantine once its suspicion counter reaches this
/// threshold (spec.md §4.4 "Suspicion and Byzantine isolation").
pub const SUSPICION_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum PbftError {
    #[error("node is not the primary for view {view}; primary is {primary}")]
    NotPrimary { view: View, primary: String },
}

#[derive(Debug, Clone)]
pub struct PbftConfig {
    pub node_id: String,
    pub all_nodes: Vec<String>,
    pub shared_secret: [u8; 32],
}

impl PbftConfig {
    pub fn new(node_id: String, all_nodes: Vec<String>, shared_secret: [u8; 32]) -> Self {
        assert!(
            all_nodes.contains(&node_id),
            "all_nodes must include this node's own id"
        );
        let n = all_nodes.len();
        let f = (n.saturating_sub(1)) / 3;
        if n < 4 {
            warn!(
                "pbft cluster of size {n} cannot tolerate any faulty node (f=0); \
                 quorum degenerates to unanimity",
            );
        }
        let _ = f;
        PbftConfig {
            node_id,
            all_nodes,
            shared_secret,
        }
    }

    pub fn n(&self) -> usize {
        self.all_nodes.len()
    }

    /// `f = floor((n-1)/3)`.
    pub fn f(&self) -> usize {
        (self.n().saturating_sub(1)) / 3
    }

    /// `quorum = 2f+1`.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// `primary(view) = all_nodes[view mod n]` (spec.md §4.4).
    pub fn primary(&self, view: View) -> &str {
        let idx = (view as usize) % self.n();
        &self.all_nodes[idx]
    }
}

#[derive(Debug, Default)]
struct SequenceSlot {
    pre_prepare: Option<PbftMessage>,
    prepares: HashMap<String, PbftMessage>,
    commits: HashMap<String, PbftMessage>,
    prepared_emitted: bool,
    committed_emitted: bool,
    applied: bool,
}

/// An executed (fully-committed, in-order) PBFT request.
#[derive(Debug, Clone)]
pub struct Executed {
    pub sequence: Sequence,
    pub request: Vec<u8>,
}

pub struct PbftState {
    config: PbftConfig,
    view: View,
    next_sequence: Sequence,
    slots: HashMap<Sequence, SequenceSlot>,
    suspicion: HashMap<String, u32>,
    byzantine: HashSet<String>,
    last_executed: Sequence,
    executed_count: u64,
    pending_applied: Vec<Executed>,
}

impl PbftState {
    pub fn new(config: PbftConfig) -> Self {
        PbftState {
            config,
            view: 0,
            next_sequence: 0,
            slots: HashMap::new(),
            suspicion: HashMap::new(),
            byzantine: HashSet::new(),
            last_executed: 0,
            executed_count: 0,
            pending_applied: Vec::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn last_executed(&self) -> Sequence {
        self.last_executed
    }

    pub fn executed_count(&self) -> u64 {
        self.executed_count
    }

    pub fn is_primary(&self) -> bool {
        self.config.primary(self.view) == self.config.node_id
    }

    /// The current view's primary, per `PbftConfig::primary` (spec.md §4.4:
    /// "each node independently knows the primary; no election").
    pub fn primary(&self) -> &str {
        self.config.primary(self.view)
    }

    pub fn is_byzantine(&self, node: &str) -> bool {
        self.byzantine.contains(node)
    }

    /// Drain requests that reached COMMITTED-LOCAL and were applied in
    /// sequence order since the last drain.
    pub fn take_executed(&mut self) -> Vec<Executed> {
        std::mem::take(&mut self.pending_applied)
    }

    fn flag_suspicious(&mut self, sender: &str, reason: &str) {
        if sender == self.config.node_id {
            return;
        }
        let counter = self.suspicion.entry(sender.to_string()).or_insert(0);
        *counter += 1;
        warn!(
            "node {} suspicious ({reason}), counter now {}",
            sender, *counter
        );
        if *counter >= SUSPICION_THRESHOLD && self.byzantine.insert(sender.to_string()) {
            warn!("node {} flagged Byzantine and isolated", sender);
        }
    }

    fn sign(&self, view: View, sequence: Sequence, digest: &Hash) -> Hash {
        tag(&self.config.node_id, view, sequence, digest, &self.config.shared_secret)
    }

    fn verify_tag(&self, msg: &PbftMessage) -> bool {
        tag(
            &msg.sender,
            msg.view,
            msg.sequence,
            &msg.digest,
            &self.config.shared_secret,
        ) == msg.tag
    }

    /// Primary-only: admit a new client request, assign it the next
    /// sequence number, and broadcast a PRE_PREPARE (spec.md §4.4).
    pub fn submit_request(&mut self, request: Vec<u8>) -> Result<Vec<PbftOutbound>, PbftError> {
        if !self.is_primary() {
            return Err(PbftError::NotPrimary {
                view: self.view,
                primary: self.config.primary(self.view).to_string(),
            });
        }
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let d = digest(&request);
        let pre_prepare = PbftMessage {
            kind: PbftKind::PrePrepare,
            view: self.view,
            sequence,
            digest: d,
            sender: self.config.node_id.clone(),
            tag: self.sign(self.view, sequence, &d),
            request: Some(request),
        };

        let slot = self.slots.entry(sequence).or_default();
        slot.pre_prepare = Some(pre_prepare.clone());

        let mut out = vec![PbftOutbound {
            message: pre_prepare,
        }];
        // The primary accepts its own pre-prepare unconditionally and
        // contributes its own PREPARE vote, exactly as a replica would on
        // receipt (spec.md §4.4: quorum counts "at least quorum PREPARE
        // records (including its own)").
        out.extend(self.emit_prepare(self.view, sequence, d));
        Ok(out)
    }

    fn emit_prepare(&mut self, view: View, sequence: Sequence, d: Hash) -> Vec<PbftOutbound> {
        let prepare = PbftMessage {
            kind: PbftKind::Prepare,
            view,
            sequence,
            digest: d,
            sender: self.config.node_id.clone(),
            tag: self.sign(view, sequence, &d),
            request: None,
        };
        self.slots
            .entry(sequence)
            .or_default()
            .prepares
            .insert(self.config.node_id.clone(), prepare.clone());
        vec![PbftOutbound { message: prepare }]
    }

    fn emit_commit(&mut self, view: View, sequence: Sequence, d: Hash) -> Vec<PbftOutbound> {
        let commit = PbftMessage {
            kind: PbftKind::Commit,
            view,
            sequence,
            digest: d,
            sender: self.config.node_id.clone(),
            tag: self.sign(view, sequence, &d),
            request: None,
        };
        self.slots
            .entry(sequence)
            .or_default()
            .commits
            .insert(self.config.node_id.clone(), commit.clone());
        vec![PbftOutbound { message: commit }]
    }

    /// Handle an inbound message of any phase, returning whatever outbound
    /// traffic this node now needs to emit as a reaction.
    pub fn handle_message(&mut self, msg: PbftMessage) -> Vec<PbftOutbound> {
        if self.byzantine.contains(&msg.sender) {
            debug!("dropping message from isolated node {}", msg.sender);
            return Vec::new();
        }
        if !self.verify_tag(&msg) {
            self.flag_suspicious(&msg.sender, "invalid integrity tag");
            return Vec::new();
        }
        if msg.view != self.view {
            // Out-of-view traffic is silently ignored; view changes are out
            // of scope (spec.md §4.4 Non-goals).
            return Vec::new();
        }

        match msg.kind {
            PbftKind::PrePrepare => self.handle_pre_prepare(msg),
            PbftKind::Prepare => self.handle_prepare(msg),
            PbftKind::Commit => self.handle_commit(msg),
        }
    }

    fn handle_pre_prepare(&mut self, msg: PbftMessage) -> Vec<PbftOutbound> {
        if msg.sender != self.config.primary(msg.view) {
            self.flag_suspicious(&msg.sender, "pre-prepare from a non-primary node");
            return Vec::new();
        }
        let request = match &msg.request {
            Some(r) => r.clone(),
            None => {
                self.flag_suspicious(&msg.sender, "pre-prepare missing its request body");
                return Vec::new();
            }
        };
        if digest(&request) != msg.digest {
            self.flag_suspicious(&msg.sender, "pre-prepare digest does not match request");
            return Vec::new();
        }

        let view = msg.view;
        let sequence = msg.sequence;
        let d = msg.digest;

        if let Some(existing) = self.slots.get(&sequence).and_then(|s| s.pre_prepare.as_ref()) {
            if existing.digest != d {
                self.flag_suspicious(&msg.sender, "conflicting pre-prepares for the same sequence");
            }
            return Vec::new();
        }

        self.slots.entry(sequence).or_default().pre_prepare = Some(msg);
        info!("accepted pre-prepare for sequence {sequence} in view {view}");
        self.emit_prepare(view, sequence, d)
    }

    fn handle_prepare(&mut self, msg: PbftMessage) -> Vec<PbftOutbound> {
        let sequence = msg.sequence;
        let view = msg.view;
        let d = msg.digest;
        let sender = msg.sender.clone();

        let digest_agrees = self
            .slots
            .get(&sequence)
            .and_then(|s| s.pre_prepare.as_ref())
            .map(|pp| pp.digest == d);

        match digest_agrees {
            Some(false) => {
                self.flag_suspicious(&sender, "prepare digest disagrees with accepted pre-prepare");
                return Vec::new();
            }
            _ => {
                self.slots
                    .entry(sequence)
                    .or_default()
                    .prepares
                    .insert(sender, msg);
            }
        }

        self.maybe_become_prepared(view, sequence, d)
    }

    fn maybe_become_prepared(&mut self, view: View, sequence: Sequence, d: Hash) -> Vec<PbftOutbound> {
        let quorum = self.config.quorum();
        let slot = match self.slots.get(&sequence) {
            Some(s) => s,
            None => return Vec::new(),
        };
        if slot.pre_prepare.is_none() || slot.prepared_emitted {
            return Vec::new();
        }
        if slot.prepares.len() < quorum {
            return Vec::new();
        }
        self.slots.get_mut(&sequence).unwrap().prepared_emitted = true;
        info!("sequence {sequence} prepared in view {view}, broadcasting commit");
        self.emit_commit(view, sequence, d)
    }

    fn handle_commit(&mut self, msg: PbftMessage) -> Vec<PbftOutbound> {
        let sequence = msg.sequence;
        let d = msg.digest;
        let sender = msg.sender.clone();

        let digest_agrees = self
            .slots
            .get(&sequence)
            .and_then(|s| s.pre_prepare.as_ref())
            .map(|pp| pp.digest == d);

        if digest_agrees == Some(false) {
            self.flag_suspicious(&sender, "commit digest disagrees with accepted pre-prepare");
            return Vec::new();
        }
        self.slots
            .entry(sequence)
            .or_default()
            .commits
            .insert(sender, msg);

        self.maybe_commit_local(sequence);
        self.advance_execution();
        Vec::new()
    }

    fn maybe_commit_local(&mut self, sequence: Sequence) {
        let quorum = self.config.quorum();
        let slot = match self.slots.get(&sequence) {
            Some(s) => s,
            None => return,
        };
        if slot.pre_prepare.is_none() || !slot.prepared_emitted || slot.committed_emitted {
            return;
        }
        if slot.commits.len() < quorum {
            return;
        }
        self.slots.get_mut(&sequence).unwrap().committed_emitted = true;
        info!("sequence {sequence} committed-local");
    }

    /// Requests execute strictly in sequence order (spec.md §4.4 P1: total
    /// order), so a committed-local slot only applies once every lower
    /// sequence has already been applied.
    fn advance_execution(&mut self) {
        loop {
            let next = self.last_executed + 1;
            let ready = self
                .slots
                .get(&next)
                .map(|s| s.committed_emitted && !s.applied)
                .unwrap_or(false);
            if !ready {
                break;
            }
            let slot = self.slots.get_mut(&next).unwrap();
            slot.applied = true;
            let request = slot
                .pre_prepare
                .as_ref()
                .and_then(|pp| pp.request.clone())
                .expect("committed slot must carry its request");
            self.last_executed = next;
            self.executed_count += 1;
            self.pending_applied.push(Executed {
                sequence: next,
                request,
            });
        }
    }

    /// Called by the caller when no PRE_PREPARE has arrived for the oldest
    /// outstanding sequence within the expected window, signalling a
    /// suspected-unresponsive primary. View-change itself is out of scope
    /// (spec.md §4.4 Non-goals); this only raises the current primary's
    /// suspicion counter so an operator-level alert can fire.
    pub fn primary_timeout(&mut self) {
        let primary = self.config.primary(self.view).to_string();
        if primary != self.config.node_id {
            self.flag_suspicious(&primary, "primary unresponsive within timeout window");
        }
    }
}
