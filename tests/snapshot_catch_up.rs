use anyhow::Result;

use raft_core::config::Config;
use raft_core::testing::fsm::encode_delta;
use raft_core::testing::{init_tracing, Fixture};

fn test_config() -> Config {
    // A low snapshot_threshold so a handful of proposals is enough to
    // force a compaction, exercising the InstallSnapshot path instead of
    // a plain AppendEntries catch-up.
    Config::builder()
        .election_timeout(100)
        .heartbeat_timeout(20)
        .lost_contact_timeout(1_000)
        .snapshot_threshold(3)
        .snapshot_trailing_entries(0)
        .build()
        .expect("valid test config")
}

/// Cluster snapshot_catch_up test.
///
/// - elects a leader in a 2-node cluster with a small snapshot_threshold.
/// - proposes enough commands that the leader compacts its log behind a
///   snapshot boundary.
/// - asserts every server's state machine converges to the same summed
///   value, whether it got there via replayed entries or an installed
///   snapshot.
///
/// RUST_LOG=raft_core=trace cargo test --test snapshot_catch_up
#[tokio::test]
async fn snapshot_catch_up() -> Result<()> {
    init_tracing();
    let mut fixture = Fixture::new(2, test_config()).await;
    let leader = fixture.step_until_has_leader(2_000).await.expect("leader elected");

    for i in 1..=5i64 {
        fixture.node(leader).client_propose(encode_delta(i)).await.expect("propose should succeed while leading");
    }

    for id in fixture.ids() {
        let applied = fixture.step_until_applied(id, 6, 5_000).await;
        assert!(applied, "server {id} never caught up to index 6");
    }

    let expected = 1 + 2 + 3 + 4 + 5;
    for id in fixture.ids() {
        let value = fixture.node(id).with_fsm(|fsm| fsm.value).await;
        assert_eq!(value, expected, "server {id} fsm diverged from the expected sum");
    }

    Ok(())
}
