use anyhow::Result;

use raft_core::config::Config;
use raft_core::testing::{init_tracing, Fixture};
use raft_core::Role;

fn test_config() -> Config {
    Config::builder().election_timeout(100).heartbeat_timeout(20).lost_contact_timeout(1_000).build().expect("valid test config")
}

/// Cluster leadership_change_under_partition test.
///
/// - elects a leader in a 3-node cluster.
/// - partitions the leader from both followers.
/// - asserts the deposed leader steps down within roughly one election
///   timeout (it can no longer hear from a majority), and the remaining
///   two servers elect a different leader among themselves.
///
/// RUST_LOG=raft_core=trace cargo test --test leadership_change_under_partition
#[tokio::test]
async fn leadership_change_under_partition() -> Result<()> {
    init_tracing();
    let mut fixture = Fixture::new(3, test_config()).await;
    let original_leader = fixture.step_until_has_leader(2_000).await.expect("initial leader");

    fixture.depose().await;

    let election_timeout = test_config().election_timeout;
    let stepped_down = fixture
        .step_until(election_timeout * 3, |f| f.node(original_leader).metrics().borrow().role != Role::Leader)
        .await;
    assert!(stepped_down, "deposed leader should step down within one election timeout");

    let new_leader = fixture.step_until_has_leader(3_000).await;
    assert!(new_leader.is_some(), "remaining majority should elect a new leader");
    assert_ne!(new_leader, Some(original_leader));

    Ok(())
}
