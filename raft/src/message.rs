//! Wire types for the Raft peer-RPC contract (spec.md §4.2, §6.2).

use serde::{Deserialize, Serialize};

pub type Term = u64;
pub type LogIndex = u64;

/// One entry in the replicated log (spec.md §3 "Raft log entry").
///
/// `command` is an opaque byte envelope — the lock manager is the only
/// consumer that knows how to interpret it (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: String,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: String,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
}

/// An inbound message from a peer, tagged with its sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteRequest),
    RequestVoteReply(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesReply(AppendEntriesResponse),
}

/// A message this node wants sent to a specific peer (spec.md never
/// broadcasts Raft RPCs — every message here has exactly one destination).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: String,
    pub message: RaftMessage,
}
