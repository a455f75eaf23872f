//! I/O collaborators the core depends on but does not implement itself:
//! durable storage, network transport, and timekeeping (spec §6.1/§6.2).

use async_trait::async_trait;

use crate::error::RaftResult;
use crate::log::Entry;
use crate::membership::{Configuration, ServerId};
use crate::messages::{AppendEntries, InstallSnapshot, RequestVote};
use crate::LogId;

/// The durable state a server must restore on restart: its hard state
/// (current term, who it voted for) and the last configuration known at
/// startup. Mirrors the teacher's `HardState`/`InitialState`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<ServerId>,
}

#[derive(Clone, Debug, Default)]
pub struct InitialState {
    pub hard_state: HardState,
    pub last_log_id: LogId,
    pub last_applied: u64,
    pub configuration: Configuration,
}

/// Durable storage for the log and hard state, per spec §6.1.
///
/// Implementations are expected to make `append_to_log`/`save_hard_state`
/// durable before returning `Ok`; the core treats a returned error as a
/// potential crash per the leader-disk-write-failure Open Question (see
/// DESIGN.md).
#[async_trait]
pub trait RaftStorage: Send + Sync + 'static {
    async fn get_initial_state(&self) -> RaftResult<InitialState>;

    /// Write the initial CONFIGURATION entry at index 1, establishing the
    /// cluster's starting membership before any election or client write
    /// can occur (spec §6.1). Fails if the store already has a hard
    /// state, a log entry, or an applied index — a server is bootstrapped
    /// exactly once, before its first `start()`.
    async fn bootstrap(&self, configuration: &Configuration) -> RaftResult<()>;

    async fn save_hard_state(&self, hard_state: &HardState) -> RaftResult<()>;

    async fn append_to_log(&self, entries: &[Entry]) -> RaftResult<()>;

    /// Delete every entry with index `>= from`, used when resolving a log
    /// conflict (spec §4.4) or after a suffix was superseded.
    async fn delete_logs_from(&self, from: u64) -> RaftResult<()>;

    async fn get_log_entries(&self, start: u64, end: u64) -> RaftResult<Vec<Entry>>;

    /// Persist that entries through `index` have been applied, so a
    /// restart can resume from `last_applied` instead of replaying
    /// everything (spec §4.8).
    async fn save_last_applied(&self, index: u64) -> RaftResult<()>;
}

/// Network transport between servers, per spec §6.2/§5.
///
/// Sends are fire-and-forget at the protocol level: a `send_*` call
/// completes once the transport has taken ownership of the message, not
/// once the peer has received or answered it (spec §5's suspension-point
/// note). The corresponding `*Result` message is delivered back to the
/// sender independently — by the transport invoking the sender's
/// `Raft::request_vote_result`/`append_entries_result`/
/// `install_snapshot_result` whenever it decides the reply has arrived.
#[async_trait]
pub trait RaftTransport: Send + Sync + 'static {
    async fn send_request_vote(&self, target: ServerId, rpc: RequestVote) -> RaftResult<()>;

    async fn send_append_entries(&self, target: ServerId, rpc: AppendEntries) -> RaftResult<()>;

    async fn send_install_snapshot(&self, target: ServerId, rpc: InstallSnapshot) -> RaftResult<()>;
}

/// Timekeeping and randomness capability, abstracted so the deterministic
/// test harness can substitute a virtual clock (spec §6.1, §4.10).
pub trait Clock: Send + Sync + 'static {
    /// Monotonic milliseconds since some fixed, implementation-defined
    /// epoch. Only differences between calls are meaningful.
    fn now_millis(&self) -> u64;

    /// A uniform random integer in `[low, high)`, used for election timeout
    /// jitter (spec §4.2). A deterministic harness implements this with a
    /// seeded RNG so scenarios replay identically.
    fn rand_range(&self, low: u64, high: u64) -> u64;
}
