//! The wait-for graph (spec.md §3 "Wait-for graph", §4.3 "Deadlock
//! detection"). Always derived on demand from the lock table, never stored
//! (spec.md §9 Design Notes: "Wait-for graph → derived view").

use std::collections::{HashMap, HashSet};

use super::{LockRecord, LockTable};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Directed edges `u -> v` where `u` waits on a lock currently held by `v`.
pub fn wait_for_edges(table: &LockTable) -> Vec<(String, String)> {
    let mut edges = Vec::new();
    for record in table.values() {
        for (waiter, _) in &record.waiters {
            for holder in &record.holders {
                edges.push((waiter.clone(), holder.clone()));
            }
        }
    }
    edges
}

/// True iff adding `extra_edges` on top of the table's existing wait-for
/// edges would create a cycle. Implements the DFS-with-colors algorithm
/// from spec.md §4.3: WHITE -> GRAY -> BLACK, a back-edge to a GRAY vertex
/// signals a cycle.
pub fn would_cycle(table: &LockTable, extra_edges: &[(String, String)]) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let owned_edges = wait_for_edges(table);
    for (u, v) in &owned_edges {
        adjacency.entry(u.as_str()).or_default().push(v.as_str());
    }
    for (u, v) in extra_edges {
        adjacency.entry(u.as_str()).or_default().push(v.as_str());
    }

    let mut colors: HashMap<&str, Color> = HashMap::new();
    let vertices: HashSet<&str> = adjacency
        .keys()
        .copied()
        .chain(adjacency.values().flatten().copied())
        .collect();
    for v in &vertices {
        colors.entry(v).or_insert(Color::White);
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> bool {
        colors.insert(node, Color::Gray);
        if let Some(neighbors) = adjacency.get(node) {
            for &next in neighbors {
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::Gray => return true,
                    Color::White => {
                        if visit(next, adjacency, colors) {
                            return true;
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        colors.insert(node, Color::Black);
        false
    }

    let keys: Vec<&str> = vertices.into_iter().collect();
    for v in keys {
        if colors.get(v).copied() == Some(Color::White) && visit(v, &adjacency, &mut colors) {
            return true;
        }
    }
    false
}

/// The proposed new edges `requester -> holder` for every current holder of
/// `name`, used to probe a pending `acquire` before it is appended.
pub fn proposed_edges(record: Option<&LockRecord>, requester: &str) -> Vec<(String, String)> {
    match record {
        None => Vec::new(),
        Some(r) => r
            .holders
            .iter()
            .map(|h| (requester.to_string(), h.clone()))
            .collect(),
    }
}
