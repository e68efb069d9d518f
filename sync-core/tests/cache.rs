//! Per-node coherent cache: miss-then-fetch, cross-node invalidation on
//! `put`, and the MODIFIED/SHARED state transitions (spec.md §8 seed
//! scenario 5, §4.5 "Cache coherence").

mod common;

use std::collections::HashMap;

use common::Cluster;
use sync_core::cache::{CacheState, GetOutcome};

#[test]
fn a_miss_fetches_from_the_backing_source_and_becomes_shared() {
    let mut backing = HashMap::new();
    backing.insert("greeting".to_string(), b"hello".to_vec());
    let cluster = Cluster::with_backing(&["A", "B"], backing);

    let (outcome, value) = cluster.node("A").cache_get("greeting");
    assert_eq!(outcome, GetOutcome::Miss);
    assert_eq!(value, Some(b"hello".to_vec()));

    // A second get on the same node is now a hit in SHARED state.
    let (outcome, value) = cluster.node("A").cache_get("greeting");
    assert_eq!(outcome, GetOutcome::Hit(CacheState::Shared));
    assert_eq!(value, Some(b"hello".to_vec()));
}

#[test]
fn a_miss_on_an_unknown_key_returns_no_value() {
    let cluster = Cluster::with_backing(&["A", "B"], HashMap::new());
    let (outcome, value) = cluster.node("A").cache_get("nope");
    assert_eq!(outcome, GetOutcome::Miss);
    assert!(value.is_none());
}

#[test]
fn a_put_invalidates_every_other_node_holding_that_key() {
    let mut backing = HashMap::new();
    backing.insert("counter".to_string(), b"0".to_vec());
    let cluster = Cluster::with_backing(&["A", "B", "C"], backing);

    // B and C both pull the key in and cache it as SHARED.
    cluster.node("B").cache_get("counter");
    cluster.node("C").cache_get("counter");
    assert_eq!(
        cluster.node("B").cache_get("counter").0,
        GetOutcome::Hit(CacheState::Shared)
    );
    assert_eq!(
        cluster.node("C").cache_get("counter").0,
        GetOutcome::Hit(CacheState::Shared)
    );

    // A writes a new value locally; every peer holding "counter" must be
    // told to invalidate it (C1: only A may be MODIFIED for this key).
    cluster.node("A").cache_put("counter", b"1".to_vec());

    // B and C now miss (against the *original* backing value, since this
    // workspace's cache has no write-through to the backing source — the
    // invalidated peers simply re-fetch whatever the backing source holds).
    let (outcome, _) = cluster.node("B").cache_get("counter");
    assert_eq!(outcome, GetOutcome::Miss);
    let (outcome, _) = cluster.node("C").cache_get("counter");
    assert_eq!(outcome, GetOutcome::Miss);

    // A itself still holds its own value as MODIFIED.
    let (outcome, value) = cluster.node("A").cache_get("counter");
    assert_eq!(outcome, GetOutcome::Hit(CacheState::Modified));
    assert_eq!(value, Some(b"1".to_vec()));
}

#[test]
fn lru_eviction_respects_the_configured_maxsize() {
    let cluster = Cluster::with_backing(&["A"], HashMap::new());
    // Cluster::with_backing sets cache_maxsize to 4 for every node.
    for i in 0..4 {
        cluster.node("A").cache_put(&format!("k{i}"), vec![i as u8]);
    }
    assert_eq!(cluster.node("A").cache_metrics().size, 4);

    // A 5th key evicts the least-recently-used one (k0).
    cluster.node("A").cache_put("k4", vec![4]);
    assert_eq!(cluster.node("A").cache_metrics().size, 4);

    let (outcome, _) = cluster.node("A").cache_get("k0");
    assert_eq!(outcome, GetOutcome::Miss, "k0 should have been evicted as LRU");
}
