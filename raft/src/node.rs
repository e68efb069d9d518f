//! The public entry point for driving a single Raft node, mirroring the
//! reference project's `raft::node::Node`: a thin wrapper around the role
//! state machine that dispatches inbound [`RaftMessage`]s to the right
//! handler and returns the outbound messages produced.

use std::time::Instant;

use crate::store::Log;
use crate::message::{LogEntry, LogIndex, Outbound, RaftMessage, Role, Term};
use crate::state::{RaftConfig, RaftError, RaftState};

pub struct RaftNode<L: Log> {
    state: RaftState<L>,
}

impl<L: Log> RaftNode<L> {
    pub fn new(node_id: String, peers: Vec<String>, log: L, config: RaftConfig) -> Self {
        RaftNode {
            state: RaftState::new(node_id, peers, log, config),
        }
    }

    pub fn node_id(&self) -> &str {
        self.state.node_id()
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.state.commit_index()
    }

    pub fn leader_hint(&self) -> Option<String> {
        self.state.leader_hint()
    }

    pub fn log(&self) -> &L {
        self.state.log()
    }

    /// Advances this node's clock by one driver tick.
    #[must_use = "outbound Raft messages must be delivered to their peers"]
    pub fn timer_tick(&mut self, now: Instant) -> Vec<Outbound> {
        self.state.on_tick(now)
    }

    /// Submits `command` for replication. Leader-only; see spec.md §4.3 for
    /// how the lock manager forwards to the leader otherwise.
    pub fn propose(&mut self, command: Vec<u8>) -> Result<LogIndex, RaftError> {
        self.state.propose(command)
    }

    /// Leader-only: broadcasts `AppendEntries` right away instead of waiting
    /// for the next heartbeat tick. No-op (returns an empty vec) if this node
    /// is not currently leader.
    #[must_use = "outbound Raft messages must be delivered to their peers"]
    pub fn replicate_now(&mut self) -> Vec<Outbound> {
        self.state.replicate_now()
    }

    /// Processes a message received from peer `from`, returning any
    /// messages that must be sent in response.
    #[must_use = "outbound Raft messages must be delivered to their peers"]
    pub fn receive(&mut self, from: &str, message: RaftMessage, now: Instant) -> Vec<Outbound> {
        match message {
            RaftMessage::RequestVote(req) => {
                let resp = self.state.handle_request_vote(req, now);
                vec![Outbound {
                    to: from.to_string(),
                    message: RaftMessage::RequestVoteReply(resp),
                }]
            }
            RaftMessage::RequestVoteReply(resp) => {
                self.state.handle_request_vote_reply(from, resp, now)
            }
            RaftMessage::AppendEntries(req) => {
                let resp = self.state.handle_append_entries(req, now);
                vec![Outbound {
                    to: from.to_string(),
                    message: RaftMessage::AppendEntriesReply(resp),
                }]
            }
            RaftMessage::AppendEntriesReply(resp) => {
                self.state.handle_append_entries_reply(from, resp)
            }
        }
    }

    /// Entries newly committed since the last call; apply them to the lock
    /// state machine in order (spec.md §4.2 "State machine application").
    pub fn take_newly_committed(&mut self) -> Vec<LogEntry> {
        self.state.take_newly_committed()
    }
}
