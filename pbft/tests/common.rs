//! Deterministic message-bus simulation harness for groups of
//! [`PbftNode`]s, modeled on `raft/tests/common.rs`'s `Group`.

#![allow(dead_code)]

use std::collections::VecDeque;

use pbft::{PbftMessage, PbftNode};

pub const SECRET: [u8; 32] = [7u8; 32];

pub struct Cluster {
    pub nodes: Vec<PbftNode>,
    pub dropped: Vec<String>,
}

impl Cluster {
    pub fn new(node_ids: &[&str]) -> Self {
        let ids: Vec<String> = node_ids.iter().map(|s| s.to_string()).collect();
        let nodes = ids
            .iter()
            .map(|id| PbftNode::new(id.clone(), ids.clone(), SECRET))
            .collect();
        Cluster {
            nodes,
            dropped: Vec::new(),
        }
    }

    pub fn drop_messages_from(&mut self, node_id: &str) {
        self.dropped.push(node_id.to_string());
    }

    fn idx(&self, id: &str) -> usize {
        self.nodes.iter().position(|n| n.node_id() == id).unwrap()
    }

    pub fn primary(&self) -> &PbftNode {
        let view = self.nodes[0].view();
        let primary_id = self.nodes[0_usize].node_id().to_string();
        let _ = primary_id;
        let idx = self
            .nodes
            .iter()
            .position(|n| n.is_primary())
            .unwrap_or(0);
        let _ = view;
        &self.nodes[idx]
    }

    /// Submit a client request on the primary and run its effects to a
    /// fixed point across every honest node.
    pub fn submit_and_drain(&mut self, request: Vec<u8>) {
        let primary_idx = self.nodes.iter().position(|n| n.is_primary()).unwrap();
        let primary_from = self.nodes[primary_idx].node_id().to_string();
        let out = self.nodes[primary_idx]
            .submit_request(request)
            .expect("designated primary must accept the request");
        self.drain(primary_from, out);
    }

    /// Inject a raw (possibly forged) message directly, bypassing any
    /// node's own signing, to exercise suspicion/Byzantine handling.
    pub fn inject(&mut self, to: &str, message: PbftMessage) -> Vec<(String, PbftMessage)> {
        let idx = self.idx(to);
        let out = self.nodes[idx].receive(message);
        out.into_iter()
            .map(|o| (to.to_string(), o.message))
            .collect()
    }

    fn drain(&mut self, from: String, outbound: Vec<pbft::PbftOutbound>) {
        let mut queue: VecDeque<(String, PbftMessage)> = VecDeque::new();
        if !self.dropped.contains(&from) {
            for o in outbound {
                for node in &self.nodes {
                    queue.push_back((node.node_id().to_string(), o.message.clone()));
                }
            }
        }

        while let Some((to, msg)) = queue.pop_front() {
            if self.dropped.contains(&msg.sender) {
                continue;
            }
            // A node never needs to receive its own self-authored message
            // over the wire; it already recorded its own vote locally.
            if to == msg.sender {
                continue;
            }
            let idx = self.idx(&to);
            let reactions = self.nodes[idx].receive(msg);
            if self.dropped.contains(&to) {
                continue;
            }
            for r in reactions {
                for node in &self.nodes {
                    queue.push_back((node.node_id().to_string(), r.message.clone()));
                }
            }
        }
    }
}
