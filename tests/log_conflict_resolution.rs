use std::collections::HashMap;

use anyhow::Result;

use raft_core::config::Config;
use raft_core::log::Entry;
use raft_core::membership::ServerId;
use raft_core::testing::fsm::encode_delta;
use raft_core::testing::{init_tracing, Fixture};
use raft_core::LogId;

fn test_config() -> Config {
    Config::builder().election_timeout(100).heartbeat_timeout(20).lost_contact_timeout(1_000).build().expect("valid test config")
}

/// Cluster log_conflict_resolution test.
///
/// - server 1 starts with a pre-existing log `(t2,i1)(t2,i2)(t3,i3)`.
/// - server 2 starts with a conflicting log `(t2,i1)(t3,i2)`: it agrees
///   with server 1 up to index 1, then diverges.
/// - server 1 is elected leader of its own log.
/// - asserts server 2's log converges to exactly match server 1's, and
///   that the entry both logs agreed on before the conflict never
///   changes underneath the conflict-resolution process.
///
/// RUST_LOG=raft_core=trace cargo test --test log_conflict_resolution
#[tokio::test]
async fn log_conflict_resolution() -> Result<()> {
    init_tracing();

    let s1_entries = vec![
        Entry::command(LogId::new(2, 1), encode_delta(0)),
        Entry::command(LogId::new(2, 2), encode_delta(0)),
        Entry::command(LogId::new(3, 3), encode_delta(0)),
    ];
    let s2_entries =
        vec![Entry::command(LogId::new(2, 1), encode_delta(0)), Entry::command(LogId::new(3, 2), encode_delta(0))];

    let mut seeds = HashMap::new();
    seeds.insert(ServerId(1), s1_entries);
    seeds.insert(ServerId(2), s2_entries);

    let mut fixture = Fixture::new_with_seeds(2, test_config(), seeds).await;

    // A candidate's term must be >= the term its own log claims, so bump
    // both servers' persisted term to match the highest term already
    // present in their seeded logs before the election starts.
    fixture.storage(ServerId(1)).seed_hard_state(3, None);
    fixture.storage(ServerId(2)).seed_hard_state(3, None);

    let elected = fixture.elect(ServerId(1)).await;
    assert!(elected, "server 1 should be electable as leader of its own log");

    let converged = fixture
        .step_until(test_config().election_timeout * 20, |f| {
            f.node(ServerId(2)).metrics().borrow().last_log_id == f.node(ServerId(1)).metrics().borrow().last_log_id
        })
        .await;
    assert!(converged, "server 2's log should converge onto the leader's log");

    let leader_log = fixture.node(ServerId(1)).debug_log_ids().await;
    let follower_log = fixture.node(ServerId(2)).debug_log_ids().await;
    assert_eq!(leader_log, follower_log, "logs should be identical after convergence");
    assert_eq!(leader_log[0], LogId::new(2, 1), "the entry agreed on before the conflict must never change");

    Ok(())
}
