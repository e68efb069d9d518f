//! Lock manager, queue partitioner and coherent cache, wired onto the
//! `raft` and `pbft` engines into a single per-process node (spec.md §4.3,
//! §4.5, §9 "process-scoped components").
//!
//! This crate owns no transport and no durable storage of its own — those
//! are external collaborators (spec.md §1, §6.3) expressed here only as the
//! traits in [`transport`]. Everything else — the lock table, the wait-for
//! graph, the queue's routing policy, the cache's coherence state machine,
//! and the [`node::Node`] that constructs and drives all of it — lives in
//! this workspace.

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod node;
pub mod queue;
pub mod transport;

pub use config::NodeConfig;
pub use error::CoreError;
pub use node::{MetricsSnapshot, Node, PbftStatusSnapshot, PbftSubmission};
