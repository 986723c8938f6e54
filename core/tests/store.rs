//! Simulation store and job queue tests.

use simcrm_core::{
    distribution::DistributionMethod,
    error::SimError,
    simulation::{NewSimulation, SimulationStatus},
    store::{Database, FailOutcome, JobQueue, RetryPolicy, SimStore, WorkItem},
};

fn open() -> (SimStore, JobQueue) {
    let db = Database::in_memory().expect("in-memory db");
    db.migrate().expect("migration");
    let policy = RetryPolicy { max_attempts: 3, backoff_ms: 100, backoff_cap_ms: 1_000 };
    (SimStore::new(db.clone()), JobQueue::new(db, policy, 5_000))
}

fn draft(user: &str, total: i64) -> NewSimulation {
    NewSimulation {
        user_id:             user.to_string(),
        scenario:            "b2b".to_string(),
        distribution_method: DistributionMethod::Linear,
        total_records:       total,
        start_time:          1_000,
        end_time:            2_000,
    }
}

fn item(sim: &str, seq: i64, run_at: i64) -> WorkItem {
    WorkItem { simulation_id: sim.to_string(), sequence_index: seq, run_at }
}

#[test]
fn migrate_is_idempotent() {
    let db = Database::in_memory().unwrap();
    db.migrate().unwrap();
    db.migrate().unwrap();
}

#[test]
fn create_then_get() {
    let (store, _) = open();
    let sim = store.create(&draft("u1", 10)).unwrap();

    assert_eq!(sim.status, SimulationStatus::Queued);
    assert_eq!(sim.records_processed, 0);
    assert_eq!(sim.distribution_method, "linear");
    assert_eq!(sim.created_at, sim.updated_at);

    let loaded = store.get(&sim.id).unwrap().expect("simulation exists");
    assert_eq!(loaded, sim);
    assert!(store.get("missing").unwrap().is_none());
}

#[test]
fn list_by_user_is_newest_first_and_limited() {
    let (store, _) = open();
    let ids: Vec<String> = (0..5).map(|_| store.create(&draft("u1", 1)).unwrap().id).collect();
    store.create(&draft("someone-else", 1)).unwrap();

    let listed = store.list_by_user("u1", 3).unwrap();
    let listed_ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(listed_ids, vec![ids[4].as_str(), ids[3].as_str(), ids[2].as_str()]);
    assert!(listed.iter().all(|s| s.user_id == "u1"));
    assert!(store.list_by_user("nobody", 50).unwrap().is_empty());
}

#[test]
fn transition_is_compare_and_set() {
    let (store, _) = open();
    let sim = store.create(&draft("u1", 1)).unwrap();

    assert!(store.transition(&sim.id, SimulationStatus::Queued, SimulationStatus::Running).unwrap());
    // Second attempt from the stale status loses.
    assert!(!store.transition(&sim.id, SimulationStatus::Queued, SimulationStatus::Running).unwrap());
    assert!(!store.transition("missing", SimulationStatus::Queued, SimulationStatus::Running).unwrap());

    assert!(store.transition(&sim.id, SimulationStatus::Running, SimulationStatus::Completed).unwrap());
    assert_eq!(store.get(&sim.id).unwrap().unwrap().status, SimulationStatus::Completed);
}

#[test]
fn transition_rejects_skips_and_reversals() {
    let (store, _) = open();
    let sim = store.create(&draft("u1", 1)).unwrap();

    let err = store
        .transition(&sim.id, SimulationStatus::Queued, SimulationStatus::Completed)
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidState { .. }));
    let err = store
        .transition(&sim.id, SimulationStatus::Completed, SimulationStatus::Queued)
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidState { .. }));
    assert_eq!(store.get(&sim.id).unwrap().unwrap().status, SimulationStatus::Queued);
}

#[test]
fn set_processed_never_regresses() {
    let (store, _) = open();
    let sim = store.create(&draft("u1", 100)).unwrap();

    store.set_processed(&sim.id, 40).unwrap();
    store.set_processed(&sim.id, 25).unwrap();
    assert_eq!(store.get(&sim.id).unwrap().unwrap().records_processed, 40);

    store.set_processed(&sim.id, 500).unwrap();
    assert_eq!(store.get(&sim.id).unwrap().unwrap().records_processed, 100);

    assert!(matches!(
        store.set_processed("missing", 1).unwrap_err(),
        SimError::NotFound { .. }
    ));
}

#[test]
fn increment_processed_returns_new_total() {
    let (store, _) = open();
    let sim = store.create(&draft("u1", 3)).unwrap();

    assert_eq!(store.increment_processed(&sim.id, 1).unwrap(), 1);
    assert_eq!(store.increment_processed(&sim.id, 2).unwrap(), 3);
    assert_eq!(store.increment_processed(&sim.id, 1).unwrap(), 3, "capped at total");
    assert!(matches!(
        store.increment_processed("missing", 1).unwrap_err(),
        SimError::NotFound { .. }
    ));
    assert!(matches!(
        store.increment_processed(&sim.id, -1).unwrap_err(),
        SimError::Validation(_)
    ));
}

#[test]
fn queue_holds_jobs_until_due() {
    let (store, queue) = open();
    let sim = store.create(&draft("u1", 2)).unwrap();
    queue.enqueue(&[item(&sim.id, 1, 5_000), item(&sim.id, 2, 9_000)], 0).unwrap();

    assert!(queue.claim(4_999).unwrap().is_none());
    assert_eq!(queue.next_due_at().unwrap(), Some(5_000));

    let job = queue.claim(5_000).unwrap().expect("first job due");
    assert_eq!((job.sequence_index, job.attempts), (1, 1));
    assert!(queue.claim(5_000).unwrap().is_none(), "second job not yet due");

    assert!(queue.ack(&job).unwrap());
    assert_eq!(queue.count_for(&sim.id).unwrap(), 1);
}

#[test]
fn equal_delays_fire_in_enqueue_order() {
    let (store, queue) = open();
    let sim = store.create(&draft("u1", 4)).unwrap();
    let items: Vec<_> = (1..=4).map(|i| item(&sim.id, i, 100)).collect();
    queue.enqueue(&items, 0).unwrap();

    let order: Vec<i64> = (0..4)
        .map(|_| queue.claim(100).unwrap().unwrap().sequence_index)
        .collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
}

#[test]
fn expired_lease_is_redelivered() {
    let (store, queue) = open();
    let sim = store.create(&draft("u1", 1)).unwrap();
    queue.enqueue(&[item(&sim.id, 1, 0)], 0).unwrap();

    let first = queue.claim(0).unwrap().unwrap();
    assert!(queue.claim(4_999).unwrap().is_none(), "lease still held");

    let again = queue.claim(5_000).unwrap().expect("lease expired");
    assert_eq!(again.id, first.id);
    assert_eq!(again.attempts, 2);
}

#[test]
fn stale_holder_cannot_ack_or_fail() {
    let (store, queue) = open();
    let sim = store.create(&draft("u1", 1)).unwrap();
    queue.enqueue(&[item(&sim.id, 1, 0)], 0).unwrap();

    let stale = queue.claim(0).unwrap().unwrap();
    let current = queue.claim(5_000).unwrap().expect("lease expired");

    assert!(!queue.ack(&stale).unwrap());
    assert_eq!(queue.fail(&stale, "late", 6_000).unwrap(), FailOutcome::LeaseLost);
    assert_eq!(queue.count_for(&sim.id).unwrap(), 1);
    assert!(queue.claim(6_000).unwrap().is_none(), "still leased to the current holder");

    assert!(queue.ack(&current).unwrap());
    assert_eq!(queue.count_for(&sim.id).unwrap(), 0);
}

#[test]
fn failures_back_off_then_dead_letter() {
    let (store, queue) = open();
    let sim = store.create(&draft("u1", 1)).unwrap();
    queue.enqueue(&[item(&sim.id, 1, 0)], 0).unwrap();

    let job = queue.claim(0).unwrap().unwrap();
    assert_eq!(queue.fail(&job, "boom 1", 1_000).unwrap(), FailOutcome::Retry { run_at: 1_100 });
    assert!(queue.claim(1_099).unwrap().is_none());

    let job = queue.claim(1_100).unwrap().unwrap();
    assert_eq!(queue.fail(&job, "boom 2", 2_000).unwrap(), FailOutcome::Retry { run_at: 2_200 });

    let job = queue.claim(2_200).unwrap().unwrap();
    assert_eq!(job.attempts, 3);
    assert_eq!(queue.fail(&job, "boom 3", 3_000).unwrap(), FailOutcome::DeadLettered);

    assert!(queue.claim(i64::MAX / 2).unwrap().is_none(), "dead jobs are never claimed");
    assert_eq!(queue.count_for(&sim.id).unwrap(), 0);

    let dead = queue.dead_letters(&sim.id).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].last_error.as_deref(), Some("boom 3"));
}
