//! Maps a queue name to the node responsible for it.
//!
//! This is a pure function over a fixed, totally ordered node list: no
//! state is kept here, and every node reaches the same answer given the
//! same `all_nodes` and queue name. See spec.md §4.1.

use sha2::{Digest, Sha256};

/// A totally ordered, fixed set of node identifiers known to every node at
/// process start (spec.md §3 "Node identity").
#[derive(Debug, Clone)]
pub struct Ring {
    all_nodes: Vec<String>,
}

impl Ring {
    /// `all_nodes` must be the same sequence (same order) on every node in
    /// the cluster; this type does not sort it for you, since the stability
    /// of the order is the caller's contract to keep.
    pub fn new(all_nodes: Vec<String>) -> Self {
        assert!(!all_nodes.is_empty(), "a ring needs at least one node");
        Ring { all_nodes }
    }

    pub fn all_nodes(&self) -> &[String] {
        &self.all_nodes
    }

    pub fn peers<'a>(&'a self, self_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.all_nodes
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self_id)
    }

    /// `responsible(queue_name) = all_nodes[stable_hash(queue_name) mod n]`.
    pub fn responsible(&self, queue_name: &str) -> &str {
        let n = self.all_nodes.len() as u64;
        let idx = (stable_hash(queue_name) % n) as usize;
        &self.all_nodes[idx]
    }

    pub fn is_responsible(&self, self_id: &str, queue_name: &str) -> bool {
        self.responsible(queue_name) == self_id
    }
}

/// Collision-resistant, deterministic hash over the UTF-8 bytes of `name`.
///
/// `std::collections::hash_map::RandomState`'s `DefaultHasher` is seeded
/// per-process and would therefore disagree across nodes; SHA-256 does not.
pub fn stable_hash(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().expect("digest has >= 8 bytes"))
}
