//! Leader-mediated lock table, replicated as a Raft state machine
//! (spec.md §4.3). The table itself is a pure function of the committed
//! log prefix; the only mutator is [`LockManager::apply`].

pub mod command;
pub mod graph;

use std::collections::{HashMap, VecDeque};

use log::info;
use serde::{Deserialize, Serialize};

pub use command::LockCommand;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct LockRecord {
    pub lock_type: LockType,
    pub holders: Vec<String>,
    pub waiters: VecDeque<(String, LockType)>,
}

pub type LockTable = HashMap<String, LockRecord>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    Queued,
}

#[derive(Debug, Clone)]
pub struct LockStatus {
    pub lock_type: LockType,
    pub holders: Vec<String>,
    pub waiters: Vec<(String, LockType)>,
}

#[derive(Default)]
pub struct LockManager {
    table: LockTable,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            table: HashMap::new(),
        }
    }

    pub fn status(&self, name: &str) -> Option<LockStatus> {
        self.table.get(name).map(|r| LockStatus {
            lock_type: r.lock_type,
            holders: r.holders.clone(),
            waiters: r.waiters.iter().cloned().collect(),
        })
    }

    pub fn list(&self) -> Vec<(String, LockStatus)> {
        self.table
            .iter()
            .map(|(name, _)| (name.clone(), self.status(name).unwrap()))
            .collect()
    }

    pub fn wait_for_graph(&self) -> Vec<(String, String)> {
        graph::wait_for_edges(&self.table)
    }

    /// Runs the leader-side pre-flight the spec describes for `acquire`:
    /// an acquisition that would enter the waiters list is checked for a
    /// would-be cycle in the wait-for graph *before* it is proposed to
    /// Raft at all. Returns the command to propose, or CONFLICT(DEADLOCK)
    /// without touching any state.
    pub fn plan_acquire(
        &self,
        name: &str,
        lock_type: LockType,
        requester: &str,
    ) -> Result<LockCommand, CoreError> {
        let existing = self.table.get(name);
        let would_grant_immediately = match existing {
            None => true,
            Some(r) => {
                r.lock_type == LockType::Shared
                    && lock_type == LockType::Shared
                    && r.waiters.is_empty()
            }
        };

        if !would_grant_immediately {
            let extra = graph::proposed_edges(existing, requester);
            if graph::would_cycle(&self.table, &extra) {
                return Err(CoreError::Conflict(format!(
                    "DEADLOCK: granting {requester} a wait on {name} would cycle the wait-for graph"
                )));
            }
        }

        Ok(LockCommand::Acquire {
            name: name.to_string(),
            lock_type,
            requester: requester.to_string(),
        })
    }

    /// Leader-side pre-flight for `release`: the lock must exist and the
    /// requester must actually hold it.
    pub fn plan_release(&self, name: &str, requester: &str) -> Result<LockCommand, CoreError> {
        match self.table.get(name) {
            Some(r) if r.holders.iter().any(|h| h == requester) => Ok(LockCommand::Release {
                name: name.to_string(),
                requester: requester.to_string(),
            }),
            _ => Err(CoreError::NotFound(format!(
                "{requester} does not hold lock {name}"
            ))),
        }
    }

    /// The deterministic state-machine transition applied once a command
    /// commits (spec.md §4.2 "State-machine application", §4.3 "Grant
    /// rule"). Called identically by every node as entries become
    /// committed — this is the *only* mutator of lock state.
    pub fn apply(&mut self, command: &LockCommand) -> AcquireOutcome {
        match command {
            LockCommand::Acquire {
                name,
                lock_type,
                requester,
            } => self.apply_acquire(name, *lock_type, requester),
            LockCommand::Release { name, requester } => {
                self.apply_release(name, requester);
                AcquireOutcome::Granted
            }
        }
    }

    fn apply_acquire(&mut self, name: &str, lock_type: LockType, requester: &str) -> AcquireOutcome {
        let outcome = match self.table.get_mut(name) {
            None => {
                self.table.insert(
                    name.to_string(),
                    LockRecord {
                        lock_type,
                        holders: vec![requester.to_string()],
                        waiters: VecDeque::new(),
                    },
                );
                AcquireOutcome::Granted
            }
            Some(record) => {
                if record.lock_type == LockType::Shared
                    && lock_type == LockType::Shared
                    && record.waiters.is_empty()
                {
                    record.holders.push(requester.to_string());
                    AcquireOutcome::Granted
                } else {
                    record.waiters.push_back((requester.to_string(), lock_type));
                    AcquireOutcome::Queued
                }
            }
        };
        info!("lock {name}: acquire({requester}, {lock_type:?}) -> {outcome:?}");
        outcome
    }

    fn apply_release(&mut self, name: &str, requester: &str) {
        let should_remove = {
            let record = match self.table.get_mut(name) {
                Some(r) => r,
                None => return,
            };
            record.holders.retain(|h| h != requester);
            if !record.holders.is_empty() {
                false
            } else {
                promote_waiters(record);
                record.holders.is_empty() && record.waiters.is_empty()
            }
        };
        if should_remove {
            self.table.remove(name);
        }
        info!("lock {name}: release({requester})");
    }
}

/// Promotes the longest compatible prefix of `waiters` into `holders`:
/// either a single EXCLUSIVE waiter alone, or a run of consecutive SHARED
/// waiters (spec.md §4.3 "release").
fn promote_waiters(record: &mut LockRecord) {
    if record.waiters.is_empty() {
        return;
    }
    let (first_requester, first_type) = record.waiters.front().unwrap().clone();
    record.lock_type = first_type;
    match first_type {
        LockType::Exclusive => {
            record.waiters.pop_front();
            record.holders.push(first_requester);
        }
        LockType::Shared => {
            while let Some((_, t)) = record.waiters.front() {
                if *t != LockType::Shared {
                    break;
                }
                let (requester, _) = record.waiters.pop_front().unwrap();
                record.holders.push(requester);
            }
        }
    }
}
