//! The opaque `command` bytes carried by each Raft log entry (spec.md §3,
//! §4.2 "State-machine application"). Encoded with `serde_json` so the
//! `raft` crate itself never needs to know the lock manager's vocabulary.

use serde::{Deserialize, Serialize};

use super::LockType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockCommand {
    Acquire {
        name: String,
        lock_type: LockType,
        requester: String,
    },
    Release {
        name: String,
        requester: String,
    },
}

impl LockCommand {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("LockCommand is always serializable")
    }

    pub fn decode(bytes: &[u8]) -> Result<LockCommand, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
