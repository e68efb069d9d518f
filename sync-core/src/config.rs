//! Node-level configuration input (spec.md §6.3 "Config input").

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub all_nodes: Vec<String>,
    pub cache_maxsize: usize,
    pub pbft_shared_secret: [u8; 32],
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub peer_rpc_timeout: Duration,
    /// Interval on which the PBFT driver probes for primary unresponsiveness
    /// (spec.md §4.4 "primary-timeout signal"; §9 "PBFT primary-timeout
    /// timer" driver task).
    pub pbft_primary_timeout: Duration,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, all_nodes: Vec<String>) -> Self {
        NodeConfig {
            node_id: node_id.into(),
            all_nodes,
            cache_maxsize: 1024,
            pbft_shared_secret: [0u8; 32],
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            peer_rpc_timeout: Duration::from_millis(500),
            pbft_primary_timeout: Duration::from_millis(750),
        }
    }

    pub fn peers(&self) -> Vec<String> {
        self.all_nodes
            .iter()
            .filter(|n| **n != self.node_id)
            .cloned()
            .collect()
    }
}
