//! A deterministic, tick-driven simulation harness for groups of
//! [`RaftNode`]s, modeled on the reference project's own
//! `raft/tests/common.rs` (a virtual message bus driven one tick at a time,
//! with configurable message drops).

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use raft::{InMemoryLog, LogEntry, Outbound, RaftConfig, RaftNode};

pub const TICK: Duration = Duration::from_millis(10);

pub fn test_config() -> RaftConfig {
    RaftConfig::new(
        Duration::from_millis(150),
        Duration::from_millis(300),
        Duration::from_millis(20),
    )
}

pub struct Group {
    pub nodes: Vec<RaftNode<InMemoryLog>>,
    pub now: Instant,
    pub isolated: Vec<String>,
}

impl Group {
    pub fn new(node_ids: &[&str]) -> Self {
        let ids: Vec<String> = node_ids.iter().map(|s| s.to_string()).collect();
        let nodes = ids
            .iter()
            .map(|id| {
                let peers: Vec<String> = ids.iter().filter(|p| *p != id).cloned().collect();
                RaftNode::new(id.clone(), peers, InMemoryLog::new(), test_config())
            })
            .collect();
        Group {
            nodes,
            now: Instant::now(),
            isolated: Vec::new(),
        }
    }

    pub fn isolate(&mut self, node_id: &str) {
        self.isolated.push(node_id.to_string());
    }

    pub fn heal(&mut self) {
        self.isolated.clear();
    }

    fn node_idx(&self, id: &str) -> usize {
        self.nodes.iter().position(|n| n.node_id() == id).unwrap()
    }

    fn deliver(&mut self, from: String, outbound: Vec<Outbound>) -> Vec<(String, Outbound)> {
        outbound
            .into_iter()
            .filter(|m| !self.isolated.contains(&from) && !self.isolated.contains(&m.to))
            .map(|m| (from.clone(), m))
            .collect()
    }

    /// Advance every node by one tick and drain the resulting message
    /// traffic to a fixed point (mirrors the reference harness's
    /// `run_group`: ticking happens once, then messages cascade until the
    /// queue of in-flight messages is empty).
    pub fn advance(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.now += TICK;
            let mut queue: VecDeque<(String, Outbound)> = VecDeque::new();

            for node in &mut self.nodes {
                let id = node.node_id().to_string();
                if self.isolated.contains(&id) {
                    continue;
                }
                let out = node.timer_tick(self.now);
                queue.extend(
                    out.into_iter()
                        .filter(|m| !self.isolated.contains(&m.to))
                        .map(|m| (id.clone(), m)),
                );
            }

            while let Some((from, outbound)) = queue.pop_front() {
                if self.isolated.contains(&from) || self.isolated.contains(&outbound.to) {
                    continue;
                }
                let to_idx = self.node_idx(&outbound.to);
                let reply = self.nodes[to_idx].receive(&from, outbound.message, self.now);
                for m in self.deliver(outbound.to.clone(), reply) {
                    queue.push_back(m);
                }
            }
        }
    }

    pub fn leader(&self) -> Option<&RaftNode<InMemoryLog>> {
        self.nodes.iter().find(|n| n.is_leader())
    }

    pub fn leaders(&self) -> Vec<&RaftNode<InMemoryLog>> {
        self.nodes.iter().filter(|n| n.is_leader()).collect()
    }

    pub fn propose_on_leader(&mut self, command: Vec<u8>) -> Option<u64> {
        for node in &mut self.nodes {
            if node.is_leader() {
                return node.propose(command).ok();
            }
        }
        None
    }

    pub fn run_until_leader(&mut self, max_ticks: u32) -> bool {
        for _ in 0..max_ticks {
            self.advance(1);
            if self.leader().is_some() {
                return true;
            }
        }
        false
    }

    pub fn take_committed(&mut self, node_id: &str) -> Vec<LogEntry> {
        let idx = self.node_idx(node_id);
        self.nodes[idx].take_newly_committed()
    }
}
