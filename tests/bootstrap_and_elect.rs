use anyhow::Result;

use raft_core::config::Config;
use raft_core::testing::{init_tracing, Fixture};
use raft_core::Role;

fn test_config() -> Config {
    Config::builder().election_timeout(100).heartbeat_timeout(20).lost_contact_timeout(1_000).build().expect("valid test config")
}

/// Cluster bootstrap_and_elect test.
///
/// - brings up a 3-voter cluster with nobody started as leader.
/// - drives it forward until exactly one server reports LEADER and the
///   other two report FOLLOWER.
/// - asserts the leader's commit_index has advanced past zero (its
///   initial no-op entry has committed).
///
/// RUST_LOG=raft_core=trace cargo test --test bootstrap_and_elect
#[tokio::test]
async fn bootstrap_and_elect() -> Result<()> {
    init_tracing();
    let mut fixture = Fixture::new(3, test_config()).await;

    let leader = fixture.step_until_has_leader(2_000).await;
    assert!(leader.is_some(), "expected a leader to be elected within 2000ms");
    let leader_id = leader.unwrap();

    let mut leader_count = 0;
    let mut follower_count = 0;
    for id in fixture.ids() {
        match fixture.node(id).metrics().borrow().role {
            Role::Leader => leader_count += 1,
            Role::Follower => follower_count += 1,
            other => panic!("unexpected role {other:?} for server {id}"),
        }
    }
    assert_eq!(leader_count, 1, "exactly one leader expected");
    assert_eq!(follower_count, 2);
    assert!(fixture.node(leader_id).metrics().borrow().commit_index >= 1);

    Ok(())
}
