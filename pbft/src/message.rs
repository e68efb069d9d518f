//! Wire types for the PBFT three-phase protocol (spec.md §4.4, §3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type View = u64;
pub type Sequence = u64;
pub type Hash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbftKind {
    PrePrepare,
    Prepare,
    Commit,
}

/// `{type, view, sequence, digest, sender, tag, request?}` from spec.md §3.
/// `request` is only populated on `PrePrepare`; `Prepare`/`Commit` only ever
/// carry the digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbftMessage {
    pub kind: PbftKind,
    pub view: View,
    pub sequence: Sequence,
    pub digest: Hash,
    pub sender: String,
    pub tag: Hash,
    pub request: Option<Vec<u8>>,
}

/// `digest = SHA256(canonical_encoding(request))`. The request is treated as
/// an already-opaque byte envelope, so the "canonical encoding" is simply
/// those bytes (spec.md §3, §9 data-model notes).
pub fn digest(request: &[u8]) -> Hash {
    Sha256::digest(request).into()
}

/// `tag = SHA256(sender ‖ view ‖ sequence ‖ digest ‖ shared_secret)` — a
/// keyed integrity check, not a signature (spec.md §3).
pub fn tag(sender: &str, view: View, sequence: Sequence, digest: &Hash, shared_secret: &[u8; 32]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(view.to_be_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(digest);
    hasher.update(shared_secret);
    hasher.finalize().into()
}

/// An outbound PBFT message this node wants broadcast to every peer.
#[derive(Debug, Clone)]
pub struct PbftOutbound {
    pub message: PbftMessage,
}
