//! An in-memory transport with per-link latency and connectivity control,
//! driven entirely by the fixture's virtual clock (spec §4.10).
//!
//! Sends are enqueued with a `deliver_at` timestamp; nothing is actually
//! delivered until `Network::deliver_ready` is called by the fixture's
//! `step()`, which keeps the whole cluster's message ordering
//! deterministic and replayable.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

use crate::error::RaftResult;
use crate::io::RaftTransport;
use crate::membership::ServerId;
use crate::messages::{AppendEntries, InstallSnapshot, RequestVote};
use crate::raft::Raft;
use crate::testing::clock::VirtualClock;
use crate::testing::fsm::CounterFsm;
use crate::testing::storage::InMemoryStorage;

pub type TestRaft = Raft<CounterFsm, InMemoryStorage, InMemoryTransport, VirtualClock>;

enum Payload {
    RequestVote(RequestVote),
    AppendEntries(AppendEntries),
    InstallSnapshot(InstallSnapshot),
}

struct Pending {
    deliver_at: u64,
    from: ServerId,
    to: ServerId,
    payload: Payload,
}

#[derive(Clone, Copy)]
struct Link {
    connected: bool,
    latency_min: u64,
    latency_max: u64,
}

impl Default for Link {
    fn default() -> Self {
        Self { connected: true, latency_min: 1, latency_max: 5 }
    }
}

struct NetworkState {
    nodes: HashMap<ServerId, TestRaft>,
    links: HashMap<(ServerId, ServerId), Link>,
    alive: HashMap<ServerId, bool>,
    queue: VecDeque<Pending>,
}

/// Shared routing state for an entire simulated cluster. Cheap to clone;
/// every node's [`InMemoryTransport`] holds an `Arc` to the same instance.
pub struct Network {
    clock: Arc<VirtualClock>,
    state: Mutex<NetworkState>,
}

impl Network {
    pub fn new(clock: Arc<VirtualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            state: Mutex::new(NetworkState {
                nodes: HashMap::new(),
                links: HashMap::new(),
                alive: HashMap::new(),
                queue: VecDeque::new(),
            }),
        })
    }

    pub fn register(&self, id: ServerId, node: TestRaft) {
        let mut state = self.state.lock().expect("network mutex poisoned");
        state.nodes.insert(id, node);
        state.alive.insert(id, true);
    }

    pub fn set_connected(&self, a: ServerId, b: ServerId, connected: bool) {
        let mut state = self.state.lock().expect("network mutex poisoned");
        state.links.entry((a, b)).or_default().connected = connected;
        state.links.entry((b, a)).or_default().connected = connected;
    }

    pub fn set_latency(&self, a: ServerId, b: ServerId, min: u64, max: u64) {
        let mut state = self.state.lock().expect("network mutex poisoned");
        let link = state.links.entry((a, b)).or_default();
        link.latency_min = min;
        link.latency_max = max;
    }

    pub fn kill(&self, id: ServerId) {
        self.state.lock().expect("network mutex poisoned").alive.insert(id, false);
    }

    pub fn revive(&self, id: ServerId) {
        self.state.lock().expect("network mutex poisoned").alive.insert(id, true);
    }

    /// Earliest `deliver_at` among queued messages, if any.
    pub fn earliest_delivery(&self) -> Option<u64> {
        self.state.lock().expect("network mutex poisoned").queue.iter().map(|p| p.deliver_at).min()
    }

    /// Deliver exactly one message whose `deliver_at` is `<= now`, the
    /// earliest such message if several qualify, per spec §4.10's "deliver
    /// at most one message" rule. Returns whether anything was delivered.
    pub async fn deliver_one_ready(&self, now: u64) -> bool {
        let pending = {
            let mut state = self.state.lock().expect("network mutex poisoned");
            let next_idx = state
                .queue
                .iter()
                .enumerate()
                .filter(|(_, p)| p.deliver_at <= now)
                .min_by_key(|(_, p)| p.deliver_at)
                .map(|(i, _)| i);
            match next_idx {
                Some(i) => state.queue.remove(i),
                None => None,
            }
        };
        let pending = match pending {
            Some(p) => p,
            None => return false,
        };

        let alive = {
            let state = self.state.lock().expect("network mutex poisoned");
            *state.alive.get(&pending.to).unwrap_or(&false)
        };
        if !alive {
            return true;
        }
        let target = {
            let state = self.state.lock().expect("network mutex poisoned");
            state.nodes.get(&pending.to).cloned()
        };
        let target = match target {
            Some(t) => t,
            None => return true,
        };

        match pending.payload {
            Payload::RequestVote(args) => {
                if let Ok(result) = target.request_vote(args).await {
                    if let Some(sender) = self.node(pending.from) {
                        let _ = sender.request_vote_result(pending.to, result).await;
                    }
                }
            }
            Payload::AppendEntries(args) => {
                if let Ok(result) = target.append_entries(args).await {
                    if let Some(sender) = self.node(pending.from) {
                        let _ = sender.append_entries_result(pending.to, result).await;
                    }
                }
            }
            Payload::InstallSnapshot(args) => {
                if let Ok(result) = target.install_snapshot(args).await {
                    if let Some(sender) = self.node(pending.from) {
                        let _ = sender.install_snapshot_result(pending.to, result).await;
                    }
                }
            }
        }
        true
    }

    fn node(&self, id: ServerId) -> Option<TestRaft> {
        self.state.lock().expect("network mutex poisoned").nodes.get(&id).cloned()
    }

    fn enqueue(&self, from: ServerId, to: ServerId, payload: Payload) {
        let mut state = self.state.lock().expect("network mutex poisoned");
        let alive = *state.alive.get(&from).unwrap_or(&false) && *state.alive.get(&to).unwrap_or(&false);
        let link = state.links.get(&(from, to)).copied().unwrap_or_default();
        if !alive || !link.connected {
            trace!(%from, %to, "dropping message: link down or peer dead");
            return;
        }
        let latency = self.clock.rand_range(link.latency_min, link.latency_max + 1);
        let deliver_at = self.clock.now() + latency;
        state.queue.push_back(Pending { deliver_at, from, to, payload });
    }
}

/// Per-node handle to the shared [`Network`], carrying this node's own id
/// so the network knows who a send came from.
pub struct InMemoryTransport {
    pub id: ServerId,
    pub network: Arc<Network>,
}

#[async_trait]
impl RaftTransport for InMemoryTransport {
    async fn send_request_vote(&self, target: ServerId, rpc: RequestVote) -> RaftResult<()> {
        self.network.enqueue(self.id, target, Payload::RequestVote(rpc));
        Ok(())
    }

    async fn send_append_entries(&self, target: ServerId, rpc: AppendEntries) -> RaftResult<()> {
        self.network.enqueue(self.id, target, Payload::AppendEntries(rpc));
        Ok(())
    }

    async fn send_install_snapshot(&self, target: ServerId, rpc: InstallSnapshot) -> RaftResult<()> {
        self.network.enqueue(self.id, target, Payload::InstallSnapshot(rpc));
        Ok(())
    }
}
