//! Public wrapper around [`PbftState`] (mirrors `raft::node::RaftNode`).

use crate::message::{PbftMessage, PbftOutbound, Sequence, View};
use crate::state::{Executed, PbftConfig, PbftError, PbftState};

pub struct PbftNode {
    state: PbftState,
}

impl PbftNode {
    pub fn new(node_id: String, all_nodes: Vec<String>, shared_secret: [u8; 32]) -> Self {
        PbftNode {
            state: PbftState::new(PbftConfig::new(node_id, all_nodes, shared_secret)),
        }
    }

    pub fn node_id(&self) -> &str {
        self.state.node_id()
    }

    pub fn view(&self) -> View {
        self.state.view()
    }

    pub fn is_primary(&self) -> bool {
        self.state.is_primary()
    }

    pub fn primary(&self) -> &str {
        self.state.primary()
    }

    pub fn is_byzantine(&self, node: &str) -> bool {
        self.state.is_byzantine(node)
    }

    pub fn last_executed(&self) -> Sequence {
        self.state.last_executed()
    }

    pub fn executed_count(&self) -> u64 {
        self.state.executed_count()
    }

    /// Primary-only entry point for admitting a new client request.
    pub fn submit_request(&mut self, request: Vec<u8>) -> Result<Vec<PbftOutbound>, PbftError> {
        self.state.submit_request(request)
    }

    pub fn receive(&mut self, message: PbftMessage) -> Vec<PbftOutbound> {
        self.state.handle_message(message)
    }

    pub fn take_executed(&mut self) -> Vec<Executed> {
        self.state.take_executed()
    }

    pub fn primary_timeout(&mut self) {
        self.state.primary_timeout()
    }
}
