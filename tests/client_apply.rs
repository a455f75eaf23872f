use anyhow::Result;

use raft_core::config::Config;
use raft_core::testing::fsm::encode_delta;
use raft_core::testing::{init_tracing, Fixture};

fn test_config() -> Config {
    Config::builder().election_timeout(100).heartbeat_timeout(20).lost_contact_timeout(1_000).build().expect("valid test config")
}

/// Cluster client_apply test.
///
/// - elects a leader in a 3-node cluster.
/// - proposes a single command through the leader.
/// - asserts every server's state machine converges to the same value
///   once its last_applied metric catches up, not just the leader's.
///
/// RUST_LOG=raft_core=trace cargo test --test client_apply
#[tokio::test]
async fn client_apply_propagates_to_every_fsm() -> Result<()> {
    init_tracing();
    let mut fixture = Fixture::new(3, test_config()).await;
    let leader = fixture.step_until_has_leader(2_000).await.expect("cluster must elect a leader");

    fixture.node(leader).client_propose(encode_delta(1)).await.expect("leader should accept the proposal");

    for id in fixture.ids() {
        let applied = fixture.step_until_applied(id, 2, 5_000).await;
        assert!(applied, "server {id} never applied index 2");
        let value = fixture.node(id).with_fsm(|fsm| fsm.value).await;
        assert_eq!(value, 1, "server {id} fsm value mismatch");
    }

    Ok(())
}
