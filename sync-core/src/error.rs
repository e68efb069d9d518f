//! Error taxonomy for the coordination core (spec.md §7).
//!
//! Kept as a single small enum with `From` conversions at module seams,
//! the way the reference project keeps its own error surface thin — just
//! built on `thiserror` instead of hand-rolled `Display`/`From` impls.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Peer unreachable or timed out, leader unknown, PBFT quorum not yet
    /// formed. Retryable, optionally against a different node.
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        leader_hint: Option<String>,
    },

    /// Deadlock refused, PBFT digest/tag mismatch, concurrent conflicting
    /// pre-prepare.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing lock/queue entry/cache key with no fallback.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state the code believes unreachable. Fatal: the caller should stop
    /// serving this node; a supervisor may restart it.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CoreError {
    pub fn transient(reason: impl Into<String>) -> Self {
        CoreError::Transient {
            reason: reason.into(),
            leader_hint: None,
        }
    }

    pub fn transient_with_hint(reason: impl Into<String>, leader_hint: Option<String>) -> Self {
        CoreError::Transient {
            reason: reason.into(),
            leader_hint,
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        let err = CoreError::Invariant(reason.into());
        log::error!("{err}");
        err
    }
}
