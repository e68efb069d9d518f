//! Coherent per-node cache (spec.md §4.5 "Cache coherence").
//!
//! Invariant C1: at most one node may hold a given key in state MODIFIED;
//! all others must be SHARED or INVALID for that key. `put` enforces this
//! by broadcasting `invalidate(key)` to every peer before returning.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::transport::{BackingSource, PeerTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Modified,
    Shared,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    state: CacheState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub modified_count: usize,
    pub shared_count: usize,
}

/// A bounded, strictly-LRU per-node cache with cross-node invalidation.
pub struct CoherentCache<T> {
    transport: Arc<T>,
    maxsize: usize,
    entries: HashMap<String, Entry>,
    /// Most-recently-used at the back.
    recency: Vec<String>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    Hit(CacheState),
    Miss,
}

impl<T> CoherentCache<T>
where
    T: PeerTransport,
{
    pub fn new(transport: Arc<T>, maxsize: usize) -> Self {
        assert!(maxsize > 0, "maxsize must be positive");
        CoherentCache {
            transport,
            maxsize,
            entries: HashMap::new(),
            recency: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn touch(&mut self, key: &str) {
        self.recency.retain(|k| k != key);
        self.recency.push(key.to_string());
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.maxsize {
            if self.recency.is_empty() {
                break;
            }
            let lru = self.recency.remove(0);
            self.entries.remove(&lru);
            debug!("evicted {lru} (LRU)");
        }
    }

    /// `get(key)`: HIT if present (MODIFIED or SHARED), otherwise fetches
    /// from the backing source on MISS, inserting the result as SHARED.
    pub fn get<B: BackingSource>(&mut self, key: &str, backing: &B) -> (GetOutcome, Option<Vec<u8>>) {
        if let Some(entry) = self.entries.get(key) {
            let state = entry.state;
            let value = entry.value.clone();
            self.touch(key);
            self.hits += 1;
            return (GetOutcome::Hit(state), Some(value));
        }

        self.misses += 1;
        match backing.fetch(key) {
            Some(value) => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.clone(),
                        state: CacheState::Shared,
                    },
                );
                self.touch(key);
                self.evict_if_needed();
                (GetOutcome::Miss, Some(value))
            }
            None => (GetOutcome::Miss, None),
        }
    }

    /// `put(key, value)`: local state becomes MODIFIED, then every peer is
    /// told to invalidate `key` (fire-and-forget; ordering across peers is
    /// not required, spec.md §4.5).
    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                state: CacheState::Modified,
            },
        );
        self.touch(key);
        self.evict_if_needed();
        self.transport.broadcast_invalidate(key);
    }

    /// `invalidate(key)` as observed from a peer: drop the local entry if
    /// present.
    pub fn invalidate(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.recency.retain(|k| k != key);
            debug!("invalidated {key} on peer notification");
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let modified_count = self
            .entries
            .values()
            .filter(|e| e.state == CacheState::Modified)
            .count();
        CacheMetricsSnapshot {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            modified_count,
            shared_count: self.entries.len() - modified_count,
        }
    }
}
