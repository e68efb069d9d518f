//! The Raft role machine: term progression, leader election, heartbeats and
//! log replication (spec.md §4.2). This module performs no I/O and owns no
//! thread — it is driven entirely by the methods below, each of which
//! returns the [`Outbound`] messages the caller must deliver.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::Rng;

use crate::store::Log;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, LogEntry, LogIndex, Outbound, RaftMessage,
    RequestVoteRequest, RequestVoteResponse, Role, Term,
};

#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout (spec.md §4.2
    /// "Timers"). Must be at least 5x `heartbeat_interval`.
    pub election_timeout_min: Duration,
    /// Upper bound; must be >= 2x `election_timeout_min`.
    pub election_timeout_max: Duration,
    /// Fixed leader heartbeat period; must be < `election_timeout_min`.
    pub heartbeat_interval: Duration,
}

impl RaftConfig {
    pub fn new(
        election_timeout_min: Duration,
        election_timeout_max: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        assert!(
            election_timeout_max >= election_timeout_min * 2,
            "T_max must be >= 2 * T_min"
        );
        assert!(
            election_timeout_min >= heartbeat_interval * 5,
            "T_min must be >= 5 * heartbeat period"
        );
        assert!(
            heartbeat_interval < election_timeout_min,
            "heartbeat period must be < T_min"
        );
        RaftConfig {
            election_timeout_min,
            election_timeout_max,
            heartbeat_interval,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("not leader (known leader: {leader_hint:?})")]
    NotLeader { leader_hint: Option<String> },
}

struct LeaderState {
    next_index: HashMap<String, LogIndex>,
    match_index: HashMap<String, LogIndex>,
}

pub struct RaftState<L: Log> {
    node_id: String,
    peers: Vec<String>,
    config: RaftConfig,

    log: L,
    current_term: Term,
    voted_for: Option<String>,
    commit_index: LogIndex,
    last_applied: LogIndex,

    role: Role,
    leader_id: Option<String>,
    votes_received: HashSet<String>,
    leader_state: Option<LeaderState>,

    last_reset: Instant,
    election_timeout: Duration,
    last_heartbeat_sent: Instant,
}

impl<L: Log> RaftState<L> {
    pub fn new(node_id: String, peers: Vec<String>, log: L, config: RaftConfig) -> Self {
        let now = Instant::now();
        let election_timeout =
            sample_election_timeout(config.election_timeout_min, config.election_timeout_max);
        RaftState {
            node_id,
            peers,
            config,
            log,
            current_term: 0,
            voted_for: None,
            commit_index: 0,
            last_applied: 0,
            role: Role::Follower,
            leader_id: None,
            votes_received: HashSet::new(),
            leader_state: None,
            last_reset: now,
            election_timeout,
            last_heartbeat_sent: now,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn leader_hint(&self) -> Option<String> {
        self.leader_id.clone()
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Advances this node's local clock. Returns messages to send as a
    /// result: a `RequestVote` broadcast if an election just started, or
    /// heartbeats if this node is the leader and the heartbeat period has
    /// elapsed.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Outbound> {
        match self.role {
            Role::Leader => {
                if now.duration_since(self.last_heartbeat_sent) >= self.config.heartbeat_interval {
                    self.last_heartbeat_sent = now;
                    self.broadcast_append_entries()
                } else {
                    Vec::new()
                }
            }
            Role::Follower | Role::Candidate => {
                if now.duration_since(self.last_reset) >= self.election_timeout {
                    self.start_election(now)
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn rearm_election_timer(&mut self, now: Instant) {
        self.last_reset = now;
        self.election_timeout = sample_election_timeout(
            self.config.election_timeout_min,
            self.config.election_timeout_max,
        );
    }

    fn start_election(&mut self, now: Instant) -> Vec<Outbound> {
        self.current_term += 1;
        self.voted_for = Some(self.node_id.clone());
        self.role = Role::Candidate;
        self.leader_id = None;
        self.votes_received.clear();
        self.votes_received.insert(self.node_id.clone());
        self.rearm_election_timer(now);

        info!(
            "[{}] election timeout, starting election for term {}",
            self.node_id, self.current_term
        );

        let req = RequestVoteRequest {
            term: self.current_term,
            candidate_id: self.node_id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };

        self.peers
            .iter()
            .map(|peer| Outbound {
                to: peer.clone(),
                message: RaftMessage::RequestVote(req.clone()),
            })
            .collect()
    }

    fn step_down(&mut self, term: Term) {
        self.current_term = term;
        self.voted_for = None;
        self.role = Role::Follower;
        self.leader_id = None;
        self.leader_state = None;
    }

    fn become_leader(&mut self, now: Instant) -> Vec<Outbound> {
        info!("[{}] elected LEADER for term {}", self.node_id, self.current_term);
        self.role = Role::Leader;
        self.leader_id = Some(self.node_id.clone());
        let next = self.log.last_index() + 1;
        self.leader_state = Some(LeaderState {
            next_index: self.peers.iter().map(|p| (p.clone(), next)).collect(),
            match_index: self.peers.iter().map(|p| (p.clone(), 0)).collect(),
        });
        self.last_heartbeat_sent = now;
        self.broadcast_append_entries()
    }

    fn broadcast_append_entries(&self) -> Vec<Outbound> {
        let Some(leader_state) = &self.leader_state else {
            return Vec::new();
        };
        self.peers
            .iter()
            .map(|peer| {
                let next = *leader_state.next_index.get(peer).unwrap_or(&1);
                let prev_log_index = next.saturating_sub(1);
                let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
                let entries = self.log.entries_from(next);
                Outbound {
                    to: peer.clone(),
                    message: RaftMessage::AppendEntries(AppendEntriesRequest {
                        term: self.current_term,
                        leader_id: self.node_id.clone(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit: self.commit_index,
                    }),
                }
            })
            .collect()
    }

    /// Leader-only: appends `command` to the log and immediately tries to
    /// replicate it. Returns the index the entry was appended at; the entry
    /// is not committed yet (spec.md §4.3 "only after commit does it reply").
    pub fn propose(&mut self, command: Vec<u8>) -> Result<LogIndex, RaftError> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader {
                leader_hint: self.leader_hint(),
            });
        }
        let index = self.log.last_index() + 1;
        self.log.append(LogEntry {
            term: self.current_term,
            index,
            command,
        });
        if let Some(leader_state) = &mut self.leader_state {
            leader_state
                .match_index
                .insert(self.node_id.clone(), index);
        }
        // The leader counts its own match_index toward the majority right
        // away; with no peers (n=1) or peers that already match, this is
        // what lets the entry commit without waiting on a reply round.
        self.try_advance_commit_index(index);
        Ok(index)
    }

    /// Forces an immediate `AppendEntries` broadcast to every peer, bypassing
    /// the heartbeat-interval gate in `on_tick`. Callers that just proposed a
    /// new entry use this to replicate it without waiting for the next tick.
    pub fn replicate_now(&mut self) -> Vec<Outbound> {
        if !self.is_leader() {
            return Vec::new();
        }
        self.broadcast_append_entries()
    }

    pub fn handle_request_vote(
        &mut self,
        req: RequestVoteRequest,
        now: Instant,
    ) -> RequestVoteResponse {
        if req.term > self.current_term {
            self.step_down(req.term);
        }

        if req.term < self.current_term {
            return RequestVoteResponse {
                term: self.current_term,
                vote_granted: false,
            };
        }

        let already_voted_elsewhere = matches!(&self.voted_for, Some(v) if v != &req.candidate_id);
        let log_ok = req.last_log_term > self.log.last_term()
            || (req.last_log_term == self.log.last_term()
                && req.last_log_index >= self.log.last_index());

        let grant = !already_voted_elsewhere && log_ok;
        if grant {
            self.voted_for = Some(req.candidate_id.clone());
            self.rearm_election_timer(now);
            debug!(
                "[{}] granting vote to {} for term {}",
                self.node_id, req.candidate_id, req.term
            );
        }

        RequestVoteResponse {
            term: self.current_term,
            vote_granted: grant,
        }
    }

    pub fn handle_request_vote_reply(
        &mut self,
        from: &str,
        resp: RequestVoteResponse,
        now: Instant,
    ) -> Vec<Outbound> {
        if resp.term > self.current_term {
            self.step_down(resp.term);
            return Vec::new();
        }
        if self.role != Role::Candidate || resp.term != self.current_term || !resp.vote_granted {
            return Vec::new();
        }
        self.votes_received.insert(from.to_string());
        let n = self.peers.len() + 1;
        let majority = n / 2 + 1;
        if self.votes_received.len() >= majority {
            self.become_leader(now)
        } else {
            Vec::new()
        }
    }

    pub fn handle_append_entries(
        &mut self,
        req: AppendEntriesRequest,
        now: Instant,
    ) -> AppendEntriesResponse {
        if req.term > self.current_term {
            self.step_down(req.term);
        }

        if req.term < self.current_term {
            return AppendEntriesResponse {
                term: self.current_term,
                success: false,
                match_index: 0,
            };
        }

        self.role = Role::Follower;
        self.leader_id = Some(req.leader_id.clone());
        self.rearm_election_timer(now);

        if req.prev_log_index > 0 {
            match self.log.term_at(req.prev_log_index) {
                Some(term) if term == req.prev_log_term => {}
                _ => {
                    return AppendEntriesResponse {
                        term: self.current_term,
                        success: false,
                        match_index: 0,
                    };
                }
            }
        }

        for entry in &req.entries {
            match self.log.term_at(entry.index) {
                Some(existing_term) if existing_term == entry.term => {} // already present, identical
                Some(_) => {
                    // conflicting entry: truncate suffix and append the leader's version
                    self.log.truncate_from(entry.index);
                    self.log.append(entry.clone());
                }
                None => self.log.append(entry.clone()),
            }
        }

        let last_new_index = req.prev_log_index + req.entries.len() as LogIndex;
        if req.leader_commit > self.commit_index {
            self.commit_index = req.leader_commit.min(last_new_index);
        }

        AppendEntriesResponse {
            term: self.current_term,
            success: true,
            match_index: last_new_index,
        }
    }

    pub fn handle_append_entries_reply(
        &mut self,
        from: &str,
        resp: AppendEntriesResponse,
    ) -> Vec<Outbound> {
        if resp.term > self.current_term {
            self.step_down(resp.term);
            return Vec::new();
        }
        if self.role != Role::Leader || resp.term != self.current_term {
            return Vec::new();
        }

        let last_index = self.log.last_index();
        let Some(leader_state) = &mut self.leader_state else {
            return Vec::new();
        };

        if resp.success {
            leader_state
                .match_index
                .insert(from.to_string(), resp.match_index);
            leader_state
                .next_index
                .insert(from.to_string(), resp.match_index + 1);
        } else {
            let next = leader_state.next_index.entry(from.to_string()).or_insert(1);
            *next = next.saturating_sub(1).max(1);
            // Retry immediately with the decremented next_index.
            let prev_log_index = next.saturating_sub(1);
            let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
            let entries = self.log.entries_from(*next);
            return vec![Outbound {
                to: from.to_string(),
                message: RaftMessage::AppendEntries(AppendEntriesRequest {
                    term: self.current_term,
                    leader_id: self.node_id.clone(),
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.commit_index,
                }),
            }];
        }

        self.try_advance_commit_index(last_index);
        Vec::new()
    }

    /// Only entries from the leader's current term are committed via the
    /// majority rule directly; earlier-term entries ride along transitively
    /// once a later entry in the current term commits (spec.md §4.2).
    fn try_advance_commit_index(&mut self, self_match_index: LogIndex) {
        let Some(leader_state) = &mut self.leader_state else {
            return;
        };
        // The leader's own match index is always the full log, so it is
        // kept as a single authoritative entry in the map rather than
        // tallied separately — counting it twice would inflate the
        // apparent quorum and could commit an entry without a true
        // majority.
        leader_state
            .match_index
            .insert(self.node_id.clone(), self_match_index);
        let mut match_indices: Vec<LogIndex> =
            leader_state.match_index.values().copied().collect();
        match_indices.sort_unstable();

        let majority = match_indices.len() / 2 + 1;
        // The greatest index acknowledged by at least `majority` nodes.
        let candidate = match_indices[match_indices.len() - majority];

        if candidate > self.commit_index {
            if let Some(term) = self.log.term_at(candidate) {
                if term == self.current_term {
                    self.commit_index = candidate;
                }
            }
        }
    }

    /// Drains newly committed entries (`last_applied+1..=commit_index`),
    /// advancing `last_applied`. The caller is responsible for applying
    /// them, in order, to the lock state machine (spec.md §4.2 "State
    /// machine application").
    pub fn take_newly_committed(&mut self) -> Vec<LogEntry> {
        let mut applied = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            if let Some(entry) = self.log.get(self.last_applied) {
                applied.push(entry);
            } else {
                warn!(
                    "[{}] missing log entry at index {} while applying",
                    self.node_id, self.last_applied
                );
                break;
            }
        }
        applied
    }
}

fn sample_election_timeout(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let ms = if max_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    Duration::from_millis(ms)
}
