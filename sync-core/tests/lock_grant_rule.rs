//! Parametrized coverage of the lock manager's grant rule (spec.md §4.3):
//! a fresh lock always grants; shared stacks onto shared only while no
//! waiter is queued ahead of it; anything else queues. Exercised directly
//! against `LockManager::apply`, bypassing Raft entirely since the grant
//! rule itself is a pure function of the table and the command.
//!
//! Modeled on the reference project's own `#[rstest] #[case::name(...)]`
//! table-driven style (`redisless/src/server/tests/rstest_poc.rs`).

use rstest::rstest;

use sync_core::lock::{AcquireOutcome, LockCommand, LockManager, LockType};

#[rstest]
#[case::first_requester_on_a_fresh_lock_always_grants(LockType::Exclusive, &[], LockType::Shared, AcquireOutcome::Granted)]
#[case::shared_stacks_onto_shared_with_no_waiters(LockType::Shared, &[], LockType::Shared, AcquireOutcome::Granted)]
#[case::shared_request_queues_behind_an_exclusive_holder(LockType::Exclusive, &[], LockType::Shared, AcquireOutcome::Queued)]
#[case::exclusive_request_queues_behind_any_holder(LockType::Shared, &[], LockType::Exclusive, AcquireOutcome::Queued)]
#[case::shared_request_queues_behind_a_pending_exclusive_waiter(
    LockType::Shared,
    &[("already-waiting", LockType::Exclusive)],
    LockType::Shared,
    AcquireOutcome::Queued
)]
fn grant_rule_matches_spec(
    #[case] first_holder_type: LockType,
    #[case] preexisting_waiters: &[(&str, LockType)],
    #[case] requested_type: LockType,
    #[case] expected: AcquireOutcome,
) {
    let mut locks = LockManager::new();
    locks.apply(&LockCommand::Acquire {
        name: "doc".to_string(),
        lock_type: first_holder_type,
        requester: "first-holder".to_string(),
    });
    for (waiter, waiter_type) in preexisting_waiters {
        locks.apply(&LockCommand::Acquire {
            name: "doc".to_string(),
            lock_type: *waiter_type,
            requester: waiter.to_string(),
        });
    }

    let outcome = locks.apply(&LockCommand::Acquire {
        name: "doc".to_string(),
        lock_type: requested_type,
        requester: "challenger".to_string(),
    });

    assert_eq!(outcome, expected);
}

#[rstest]
#[case::sole_exclusive_waiter_alone_is_promoted(&[("w1", LockType::Exclusive)], vec!["w1"])]
#[case::a_run_of_consecutive_shared_waiters_is_promoted(
    &[("w1", LockType::Shared), ("w2", LockType::Shared)],
    vec!["w1", "w2"]
)]
#[case::a_shared_run_stops_at_the_first_exclusive_waiter(
    &[("w1", LockType::Shared), ("w2", LockType::Exclusive), ("w3", LockType::Shared)],
    vec!["w1"]
)]
fn release_promotes_the_longest_compatible_waiter_prefix(
    #[case] waiters: &[(&str, LockType)],
    #[case] expected_new_holders: Vec<&str>,
) {
    let mut locks = LockManager::new();
    locks.apply(&LockCommand::Acquire {
        name: "doc".to_string(),
        lock_type: LockType::Exclusive,
        requester: "original-holder".to_string(),
    });
    for (waiter, waiter_type) in waiters {
        locks.apply(&LockCommand::Acquire {
            name: "doc".to_string(),
            lock_type: *waiter_type,
            requester: waiter.to_string(),
        });
    }

    locks.apply(&LockCommand::Release {
        name: "doc".to_string(),
        requester: "original-holder".to_string(),
    });

    let status = locks.status("doc").unwrap();
    assert_eq!(status.holders, expected_new_holders);
}
