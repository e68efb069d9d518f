//! External-collaborator traits (spec.md §6.3) plus the in-memory fakes
//! this workspace's own tests exercise them through — playing the same
//! "stand-in for an external store" role the reference project's
//! `storage::in_memory::InMemoryStorage` plays for its own command set.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use pbft::PbftMessage;
use raft::RaftMessage;

use crate::error::CoreError;

/// A reply to a Raft peer RPC. Re-exported under its own name at this
/// boundary because `raft` itself never needs to distinguish "a message to
/// send" from "a reply to one" — only the transport seam does.
pub type RaftReply = RaftMessage;

/// Everything the core needs from the network: point-to-point Raft/PBFT
/// delivery, invalidation fan-out, and forwarding the queue's three verbs
/// to whichever node the hash ring names responsible.
pub trait PeerTransport {
    fn send_raft(&self, to: &str, msg: RaftMessage, deadline: Duration) -> Result<RaftReply, CoreError>;
    fn send_pbft(&self, to: &str, msg: PbftMessage, deadline: Duration) -> Result<(), CoreError>;
    fn broadcast_invalidate(&self, key: &str);
    fn forward_produce(&self, to: &str, queue: &str, message: Vec<u8>, deadline: Duration) -> Result<(), CoreError>;
    fn forward_consume(&self, to: &str, queue: &str, deadline: Duration) -> Result<Option<Vec<u8>>, CoreError>;
    fn forward_ack(&self, to: &str, processing_key: &str, message: Vec<u8>, deadline: Duration) -> Result<(), CoreError>;
}

/// The queue's source of truth (spec.md §6.3): append-right, atomic
/// pop-head-to-sibling-list, remove-by-value.
pub trait DurableListStore {
    fn append(&self, list: &str, value: Vec<u8>);
    fn pop_to(&self, from_list: &str, to_list: &str) -> Option<Vec<u8>>;
    fn remove_value(&self, list: &str, value: &[u8]) -> bool;
}

/// A pure `fetch(key) -> value` used on cache miss (spec.md §6.3).
pub trait BackingSource {
    fn fetch(&self, key: &str) -> Option<Vec<u8>>;
}

/// An in-memory `DurableListStore`, exercising the queue component in
/// tests without a real collaborator.
#[derive(Default)]
pub struct InMemoryListStore {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl InMemoryListStore {
    pub fn new() -> Self {
        InMemoryListStore::default()
    }

    /// Test/inspection helper: a snapshot of a named list's contents.
    pub fn snapshot(&self, list: &str) -> Vec<Vec<u8>> {
        self.lists
            .lock()
            .unwrap()
            .get(list)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl DurableListStore for InMemoryListStore {
    fn append(&self, list: &str, value: Vec<u8>) {
        self.lists
            .lock()
            .unwrap()
            .entry(list.to_string())
            .or_default()
            .push_back(value);
    }

    fn pop_to(&self, from_list: &str, to_list: &str) -> Option<Vec<u8>> {
        let mut lists = self.lists.lock().unwrap();
        let value = lists.get_mut(from_list)?.pop_front()?;
        lists
            .entry(to_list.to_string())
            .or_default()
            .push_back(value.clone());
        Some(value)
    }

    fn remove_value(&self, list: &str, value: &[u8]) -> bool {
        let mut lists = self.lists.lock().unwrap();
        match lists.get_mut(list) {
            Some(deque) => {
                if let Some(pos) = deque.iter().position(|v| v.as_slice() == value) {
                    deque.remove(pos);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

/// An in-memory `BackingSource`, fixed at construction time — enough to
/// exercise cache hit/miss behavior deterministically in tests.
#[derive(Default)]
pub struct InMemoryBackingSource {
    data: HashMap<String, Vec<u8>>,
}

impl InMemoryBackingSource {
    pub fn new(data: HashMap<String, Vec<u8>>) -> Self {
        InMemoryBackingSource { data }
    }
}

impl BackingSource for InMemoryBackingSource {
    fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }
}
