//! The deterministic cluster fixture: owns N Raft instances, a virtual
//! clock, and an in-memory network, and drives them forward one
//! `step()` at a time while checking safety invariants (spec §4.10).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::io::RaftStorage;
use crate::log::Entry;
use crate::membership::{Configuration, ServerId};
use crate::testing::clock::VirtualClock;
use crate::testing::fsm::CounterFsm;
use crate::testing::storage::InMemoryStorage;
use crate::testing::transport::{InMemoryTransport, Network, TestRaft};
use crate::{LogId, Role};

/// Tracks the highest-term leader reachable by (and acknowledging) a
/// majority, for the Leader Append-Only check (spec §8, glossary
/// "Stable leader").
#[derive(Default)]
struct StableLeaderTracker {
    leader: Option<ServerId>,
    term: u64,
    last_log: HashMap<ServerId, Vec<LogId>>,
}

pub struct Fixture {
    pub clock: Arc<VirtualClock>,
    network: Arc<Network>,
    nodes: HashMap<ServerId, TestRaft>,
    storages: HashMap<ServerId, Arc<InMemoryStorage>>,
    config: Config,
    stable_leader: StableLeaderTracker,
}

impl Fixture {
    /// Build `n` servers (ids `1..=n`), all voters. Each server's storage
    /// is bootstrapped with the initial CONFIGURATION entry at index 1
    /// before it starts, matching how a pristine cluster comes up.
    pub async fn new(n: u64, config: Config) -> Self {
        Self::new_with_seeds(n, config, HashMap::new()).await
    }

    /// Build `n` servers the same way as [`Fixture::new`], but load each
    /// server's storage from `seeds` (by server id) before starting it
    /// instead of bootstrapping it. Used by scenarios that need a
    /// pre-existing, possibly conflicting, on-disk log — e.g. S4's
    /// log-conflict resolution.
    pub async fn new_with_seeds(n: u64, config: Config, seeds: HashMap<ServerId, Vec<Entry>>) -> Self {
        assert!(n <= 8, "fixture supports at most 8 servers (spec §4.10)");
        let clock = Arc::new(VirtualClock::new(42));
        let network = Network::new(clock.clone());

        let members: Vec<_> = (1..=n)
            .map(|i| crate::membership::ServerRecord::voter(ServerId(i), format!("node-{i}")))
            .collect();
        let configuration = Configuration::new(members);

        let mut nodes = HashMap::new();
        let mut storages = HashMap::new();
        for i in 1..=n {
            let id = ServerId(i);
            let storage = Arc::new(InMemoryStorage::new(configuration.clone()));
            if let Some(entries) = seeds.get(&id) {
                storage.seed_entries(entries.clone());
            } else {
                storage.bootstrap(&configuration).await.expect("bootstrapping a pristine store cannot fail");
            }
            let transport = Arc::new(InMemoryTransport { id, network: network.clone() });
            let raft = TestRaft::new(id, config.clone(), storage.clone(), transport, clock.clone(), CounterFsm::default())
                .await
                .expect("starting a fresh in-memory instance cannot fail");
            network.register(id, raft.clone());
            nodes.insert(id, raft);
            storages.insert(id, storage);
        }

        Self { clock, network, nodes, storages, config, stable_leader: StableLeaderTracker::default() }
    }

    pub fn storage(&self, id: ServerId) -> Arc<InMemoryStorage> {
        self.storages.get(&id).expect("unknown server id").clone()
    }

    pub fn node(&self, id: ServerId) -> &TestRaft {
        self.nodes.get(&id).expect("unknown server id")
    }

    pub fn ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn disconnect(&self, a: ServerId, b: ServerId) {
        self.network.set_connected(a, b, false);
    }

    pub fn reconnect(&self, a: ServerId, b: ServerId) {
        self.network.set_connected(a, b, true);
    }

    pub fn kill(&self, id: ServerId) {
        self.network.kill(id);
    }

    pub fn revive(&self, id: ServerId) {
        self.network.revive(id);
    }

    /// Advance the clock to the minimum of (earliest pending delivery,
    /// the tick granularity), deliver at most one ready message, then
    /// tick every node with the elapsed delta — spec §4.10's `step()`.
    pub async fn step(&mut self) {
        let tick_granularity = self.config.heartbeat_timeout.min(self.config.election_timeout);
        let next_delivery = self.network.earliest_delivery();
        let elapsed = match next_delivery {
            Some(at) if at <= self.clock.now() + tick_granularity => at.saturating_sub(self.clock.now()).max(1),
            _ => tick_granularity,
        };

        self.clock.advance(elapsed);
        self.network.deliver_one_ready(self.clock.now()).await;

        for id in self.ids() {
            let node = self.node(id);
            if let Err(err) = node.tick(elapsed).await {
                debug!(%id, error = %err, "tick returned an error");
            }
        }

        self.check_safety().await;
    }

    pub async fn step_n(&mut self, n: u32) {
        for _ in 0..n {
            self.step().await;
        }
    }

    /// Step until `predicate` holds or `max_ms` of virtual time elapse.
    pub async fn step_until(&mut self, max_ms: u64, mut predicate: impl FnMut(&Fixture) -> bool) -> bool {
        let deadline = self.clock.now() + max_ms;
        while self.clock.now() < deadline {
            if predicate(self) {
                return true;
            }
            self.step().await;
        }
        predicate(self)
    }

    pub async fn step_until_has_leader(&mut self, max_ms: u64) -> Option<ServerId> {
        let ids = self.ids();
        let found = self
            .step_until(max_ms, |fixture| {
                ids.iter().any(|id| {
                    fixture
                        .nodes
                        .get(id)
                        .map(|n| n.metrics().borrow().role == Role::Leader)
                        .unwrap_or(false)
                })
            })
            .await;
        if !found {
            return None;
        }
        self.ids().into_iter().find(|id| self.node(*id).metrics().borrow().role == Role::Leader)
    }

    pub async fn step_until_has_no_leader(&mut self, max_ms: u64) -> bool {
        let ids = self.ids();
        self.step_until(max_ms, |fixture| {
            !ids.iter().any(|id| {
                fixture
                    .nodes
                    .get(id)
                    .map(|n| n.metrics().borrow().role == Role::Leader)
                    .unwrap_or(false)
            })
        })
        .await
    }

    pub async fn step_until_applied(&mut self, id: ServerId, index: u64, max_ms: u64) -> bool {
        self.step_until(max_ms, |fixture| {
            fixture.nodes.get(&id).map(|n| n.metrics().borrow().last_applied >= index).unwrap_or(false)
        })
        .await
    }

    /// Step until `id` becomes leader, assuming the cluster is fully
    /// connected; relies on `id`'s randomized timeout eventually firing
    /// first, matching spec §4.10's convenience driver.
    pub async fn elect(&mut self, id: ServerId) -> bool {
        self.step_until(self.config.election_timeout * 8, |fixture| {
            fixture.node(id).metrics().borrow().role == Role::Leader
        })
        .await
    }

    /// Drop AppendEntries acknowledgements from the current leader until
    /// it steps down (simulating S3's partition scenario).
    pub async fn depose(&mut self) -> Option<ServerId> {
        let leader = self.ids().into_iter().find(|id| self.node(*id).metrics().borrow().role == Role::Leader)?;
        for other in self.ids() {
            if other != leader {
                self.network.set_connected(leader, other, false);
            }
        }
        Some(leader)
    }

    async fn check_safety(&mut self) {
        let mut leaders: Vec<(ServerId, u64)> = Vec::new();
        for id in self.ids() {
            let metrics = self.node(id).metrics().borrow().clone();
            if metrics.role == Role::Leader {
                leaders.push((id, metrics.current_term));
            }
        }

        // Election Safety: no two servers share LEADER role at the same term.
        for i in 0..leaders.len() {
            for j in (i + 1)..leaders.len() {
                assert_ne!(
                    leaders[i].1, leaders[j].1,
                    "election safety violated: {} and {} both lead term {}",
                    leaders[i].0, leaders[j].0, leaders[i].1
                );
            }
        }

        let current = leaders.into_iter().max_by_key(|(_, term)| *term);
        match current {
            Some((id, term)) if Some(id) == self.stable_leader.leader && term == self.stable_leader.term => {
                let log = self.node(id).debug_log_ids().await;
                if let Some(previous) = self.stable_leader.last_log.get(&id) {
                    for (i, prior_id) in previous.iter().enumerate() {
                        if let Some(current_id) = log.get(i) {
                            assert_eq!(
                                prior_id, current_id,
                                "leader append-only violated at index {} for server {}",
                                i + 1,
                                id
                            );
                        }
                    }
                }
                self.stable_leader.last_log.insert(id, log);
            }
            Some((id, term)) => {
                self.stable_leader.leader = Some(id);
                self.stable_leader.term = term;
                self.stable_leader.last_log.clear();
                let log = self.node(id).debug_log_ids().await;
                self.stable_leader.last_log.insert(id, log);
            }
            None => {
                self.stable_leader.leader = None;
            }
        }
    }
}
