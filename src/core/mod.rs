//! The consensus state machine: persistent/volatile state, role-specific
//! data, and the tick driver that ties election, replication, membership
//! and snapshot handling together (spec §3, §4.8, §9).

pub mod append;
pub mod dispatch;
pub mod election;
pub mod membership;
pub mod replication;
pub mod snapshot;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::RaftResult;
use crate::fsm::Fsm;
use crate::io::{Clock, RaftStorage, RaftTransport};
use crate::log::Log;
use crate::membership::{Configuration, ServerId};
use crate::metrics::RaftMetrics;
use crate::{LogId, Role};

/// Leader's view of one peer's replication progress (spec §3/§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Searching for the point at which the peer's log diverges.
    Probe,
    /// Steady-state bulk send; next_index trusted to be correct.
    Pipeline,
    /// The peer is behind the compaction window; catching it up via
    /// InstallSnapshot.
    Snapshot,
}

#[derive(Clone, Copy, Debug)]
pub struct ReplicationRecord {
    pub next_index: u64,
    pub match_index: u64,
    pub last_contact: u64,
    pub mode: ReplicationMode,
}

impl ReplicationRecord {
    fn new(last_log_index: u64) -> Self {
        Self { next_index: last_log_index + 1, match_index: 0, last_contact: 0, mode: ReplicationMode::Probe }
    }
}

/// Catch-up tracking for a promotee being brought up to voting status
/// (spec §4.7).
#[derive(Clone, Copy, Debug)]
pub struct PromotionState {
    pub promotee_id: ServerId,
    pub round_number: u32,
    pub round_start_index: u64,
    pub round_start_millis: u64,
    pub promotion_start_millis: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SnapshotMeta {
    pub index: u64,
    pub term: u64,
    pub configuration: Configuration,
    pub configuration_index: u64,
}

impl SnapshotMeta {
    pub fn last_log_id(&self) -> LogId {
        LogId::new(self.term, self.index)
    }
}

/// Role-specific volatile state: a closed tagged variant, one constructor
/// per role, per spec §9 ("do not model roles as an inheritance
/// hierarchy").
pub enum RoleState {
    Unavailable,
    Follower,
    Candidate { votes: HashSet<ServerId> },
    Leader { replication: BTreeMap<ServerId, ReplicationRecord>, promotion: Option<PromotionState> },
}

impl RoleState {
    pub fn role(&self) -> Role {
        match self {
            RoleState::Unavailable => Role::Unavailable,
            RoleState::Follower => Role::Follower,
            RoleState::Candidate { .. } => Role::Candidate,
            RoleState::Leader { .. } => Role::Leader,
        }
    }
}

/// The consensus core for a single server. Every public method requires
/// `&mut self`; callers (the `Raft` handle) are responsible for providing
/// exclusive access, matching spec §5's single-threaded cooperative model.
pub struct RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    pub(crate) id: ServerId,
    pub(crate) config: Config,
    pub(crate) storage: Arc<S>,
    pub(crate) transport: Arc<T>,
    pub(crate) clock: Arc<C>,
    pub(crate) fsm: F,

    pub(crate) current_term: u64,
    pub(crate) voted_for: Option<ServerId>,
    pub(crate) log: Log,
    pub(crate) configuration: Configuration,
    pub(crate) configuration_uncommitted_index: u64,
    pub(crate) snapshot: SnapshotMeta,
    pub(crate) snapshot_in_progress: bool,

    pub(crate) commit_index: u64,
    pub(crate) last_applied: u64,
    pub(crate) last_stored: u64,

    pub(crate) role_state: RoleState,
    pub(crate) current_leader: Option<ServerId>,

    pub(crate) election_timer: u64,
    pub(crate) election_timeout_rand: u64,
    pub(crate) heartbeat_timer: u64,
    /// Milliseconds elapsed since this server most recently became leader;
    /// used as the clock against which `ReplicationRecord::last_contact`
    /// is compared.
    pub(crate) leader_clock: u64,

    pub(crate) closed: bool,
    /// A configuration entry queued by the promotion catch-up logic,
    /// appended and replicated on the next tick (spec §4.7).
    pub(crate) pending_trigger_index: Option<u64>,

    pub(crate) metrics_tx: watch::Sender<RaftMetrics>,
}

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    pub fn new(
        id: ServerId,
        config: Config,
        storage: Arc<S>,
        transport: Arc<T>,
        clock: Arc<C>,
        fsm: F,
    ) -> (Self, watch::Receiver<RaftMetrics>) {
        let (metrics_tx, metrics_rx) = watch::channel(RaftMetrics::new(id));
        let core = Self {
            id,
            config,
            storage,
            transport,
            clock,
            fsm,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            configuration: Configuration::empty(),
            configuration_uncommitted_index: 0,
            snapshot: SnapshotMeta::default(),
            snapshot_in_progress: false,
            commit_index: 0,
            last_applied: 0,
            last_stored: 0,
            role_state: RoleState::Unavailable,
            current_leader: None,
            election_timer: 0,
            election_timeout_rand: 0,
            heartbeat_timer: 0,
            leader_clock: 0,
            closed: false,
            pending_trigger_index: None,
            metrics_tx,
        };
        (core, metrics_rx)
    }

    pub fn role(&self) -> Role {
        self.role_state.role()
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn last_log_id(&self) -> LogId {
        if self.log.is_empty() {
            self.snapshot.last_log_id()
        } else {
            self.log.last_log_id()
        }
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn current_leader(&self) -> Option<ServerId> {
        self.current_leader
    }

    /// Load persistent state and transition UNAVAILABLE -> FOLLOWER, per
    /// spec §3's lifecycle.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn start(&mut self) -> RaftResult<()> {
        let initial = self.storage.get_initial_state().await?;
        self.current_term = initial.hard_state.current_term;
        self.voted_for = initial.hard_state.voted_for;
        self.last_applied = initial.last_applied;
        self.last_stored = initial.last_log_id.index;
        self.configuration = initial.configuration;

        if self.last_stored > self.log.last_index() {
            let entries = self.storage.get_log_entries(self.log.last_index() + 1, self.last_stored + 1).await?;
            if !entries.is_empty() {
                self.log.append(entries);
            }
        }

        self.become_follower();
        self.reset_election_timer();
        info!(id = %self.id, term = self.current_term, "raft instance started");
        Ok(())
    }

    pub(crate) fn is_voter(&self) -> bool {
        self.configuration.is_voter(self.id)
    }

    pub(crate) fn is_member(&self) -> bool {
        self.configuration.contains(self.id)
    }

    pub(crate) fn become_follower(&mut self) {
        self.role_state = RoleState::Follower;
        self.report_metrics();
    }

    pub(crate) fn reset_election_timer(&mut self) {
        self.election_timer = 0;
        self.election_timeout_rand =
            self.clock.rand_range(self.config.election_timeout, 2 * self.config.election_timeout);
    }

    pub(crate) fn report_metrics(&self) {
        let metrics = RaftMetrics {
            id: self.id,
            role: self.role(),
            current_term: self.current_term,
            last_log_id: self.last_log_id(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            current_leader: self.current_leader,
        };
        let _ = self.metrics_tx.send(metrics);
    }

    /// Advance the virtual or real clock by `elapsed_ms` and run the
    /// per-role periodic rules (spec §4.8). The heaviest work — leader
    /// heartbeats, candidate re-election, follower timeout — all funnels
    /// through here.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick(&mut self, elapsed_ms: u64) -> RaftResult<()> {
        if self.closed {
            return Ok(());
        }
        match &self.role_state {
            RoleState::Unavailable => Ok(()),
            RoleState::Follower => self.follower_tick(elapsed_ms).await,
            RoleState::Candidate { .. } => self.candidate_tick(elapsed_ms).await,
            RoleState::Leader { .. } => self.leader_tick(elapsed_ms).await,
        }
    }

    async fn follower_tick(&mut self, elapsed_ms: u64) -> RaftResult<()> {
        self.election_timer += elapsed_ms;
        if self.election_timer > self.election_timeout_rand && self.is_voter() && self.is_member() {
            debug!(id = %self.id, "election timeout elapsed, becoming candidate");
            self.become_candidate();
            self.start_election().await?;
        }
        Ok(())
    }

    async fn candidate_tick(&mut self, elapsed_ms: u64) -> RaftResult<()> {
        self.election_timer += elapsed_ms;
        if self.election_timer > self.election_timeout_rand {
            debug!(id = %self.id, "election timed out with no majority, retrying");
            self.start_election().await?;
        }
        Ok(())
    }

    async fn leader_tick(&mut self, elapsed_ms: u64) -> RaftResult<()> {
        self.heartbeat_timer += elapsed_ms;
        self.leader_clock += elapsed_ms;

        if !self.leader_has_been_contacted_by_majority() {
            info!(id = %self.id, "lost contact with majority of voters, stepping down");
            self.step_down_to_follower();
            return Ok(());
        }

        self.tick_promotion(elapsed_ms).await?;

        if self.heartbeat_timer >= self.config.heartbeat_timeout {
            self.heartbeat_timer = 0;
            self.trigger(0).await?;
        }
        Ok(())
    }

    /// True once a majority of voters (self included) have been heard
    /// from within the last `election_timeout`, mirroring the original
    /// implementation's `leader_has_been_contacted_by_majority_of_servers`.
    fn leader_has_been_contacted_by_majority(&self) -> bool {
        let replication = match &self.role_state {
            RoleState::Leader { replication, .. } => replication,
            _ => return true,
        };
        let mut contacted = 1usize; // self
        for voter in self.configuration.voters() {
            if voter.id == self.id {
                continue;
            }
            if let Some(record) = replication.get(&voter.id) {
                if self.leader_clock.saturating_sub(record.last_contact) <= self.config.election_timeout {
                    contacted += 1;
                }
            }
        }
        contacted >= self.configuration.quorum()
    }

    pub(crate) fn step_down_to_follower(&mut self) {
        self.current_leader = None;
        self.become_follower();
        self.reset_election_timer();
    }

    fn become_candidate(&mut self) {
        self.role_state = RoleState::Candidate { votes: HashSet::new() };
        self.current_leader = None;
        self.report_metrics();
    }

    /// Cancel in-flight work and move to UNAVAILABLE, per spec §5's
    /// cancellation semantics.
    pub async fn close(&mut self) {
        self.closed = true;
        self.role_state = RoleState::Unavailable;
        self.report_metrics();
    }
}
