use anyhow::Result;

use raft_core::config::Config;
use raft_core::membership::ServerId;
use raft_core::testing::{init_tracing, Fixture};
use raft_core::Role;

fn test_config() -> Config {
    Config::builder()
        .election_timeout(100)
        .heartbeat_timeout(20)
        .lost_contact_timeout(1_000)
        .max_catch_up_duration(std::time::Duration::from_secs(30))
        .build()
        .expect("valid test config")
}

/// Cluster promotion_round_failure test.
///
/// - elects a leader in a 3-node cluster.
/// - adds a fourth, non-voting server that was never registered with the
///   fixture's network, so no AppendEntries response from it can ever
///   arrive.
/// - asserts that after max_catch_up_duration of virtual time the
///   promotion has been abandoned: the new server is still a non-voter,
///   and the leader itself was never destabilized by the stalled
///   promotion.
///
/// RUST_LOG=raft_core=trace cargo test --test promotion_round_failure
#[tokio::test]
async fn promotion_round_failure() -> Result<()> {
    init_tracing();
    let mut fixture = Fixture::new(3, test_config()).await;
    let leader = fixture.step_until_has_leader(2_000).await.expect("leader elected");

    let new_id = ServerId(4);
    fixture.node(leader).add_server(new_id, "node-4".into()).await.expect("add_server should succeed");
    fixture.node(leader).promote_server(new_id).await.expect("promote_server should be accepted");

    let max_catch_up_ms = test_config().max_catch_up_duration.as_millis() as u64;
    fixture.step_until(max_catch_up_ms + test_config().election_timeout * 4, |_| false).await;

    assert!(!fixture.node(leader).is_voter(new_id).await, "server {new_id} should remain a non-voter");
    assert_eq!(fixture.node(leader).metrics().borrow().role, Role::Leader, "leader should not have been destabilized");

    Ok(())
}
