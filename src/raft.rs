//! The public handle applications and transports drive a Raft instance
//! through (spec §5). Wraps a [`RaftCore`] behind a `tokio::sync::Mutex`
//! so that every operation executes with exclusive access to the
//! instance, matching the single-threaded cooperative model, while still
//! letting a deterministic harness step the instance explicitly instead
//! of racing against a free-running background task.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tracing::instrument;

use crate::core::RaftCore;
use crate::error::{ClientError, RaftResult};
use crate::fsm::Fsm;
use crate::io::{Clock, RaftStorage, RaftTransport};
use crate::membership::ServerId;
use crate::messages::{
    AppendEntries, AppendEntriesResult, InstallSnapshot, InstallSnapshotResult, RequestVote, RequestVoteResult,
};
use crate::metrics::RaftMetrics;
use crate::{Config, LogId};

/// A handle to one server's consensus instance. Cheap to clone; clones
/// share the same underlying core.
pub struct Raft<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    inner: Arc<Mutex<RaftCore<F, S, T, C>>>,
    metrics_rx: watch::Receiver<RaftMetrics>,
}

impl<F, S, T, C> Clone for Raft<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), metrics_rx: self.metrics_rx.clone() }
    }
}

impl<F, S, T, C> Raft<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    pub async fn new(id: ServerId, config: Config, storage: Arc<S>, transport: Arc<T>, clock: Arc<C>, fsm: F) -> RaftResult<Self> {
        let (mut core, metrics_rx) = RaftCore::new(id, config, storage, transport, clock, fsm);
        core.start().await?;
        Ok(Self { inner: Arc::new(Mutex::new(core)), metrics_rx })
    }

    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.metrics_rx.clone()
    }

    /// Advance the instance's clock by `elapsed_ms` and run the
    /// per-role periodic rules (spec §4.8).
    #[instrument(level = "debug", skip(self))]
    pub async fn tick(&self, elapsed_ms: u64) -> RaftResult<()> {
        self.inner.lock().await.tick(elapsed_ms).await
    }

    pub async fn request_vote(&self, args: RequestVote) -> RaftResult<RequestVoteResult> {
        self.inner.lock().await.on_request_vote(args).await
    }

    pub async fn request_vote_result(&self, voter: ServerId, result: RequestVoteResult) -> RaftResult<()> {
        self.inner.lock().await.on_request_vote_result(voter, result).await
    }

    pub async fn append_entries(&self, args: AppendEntries) -> RaftResult<AppendEntriesResult> {
        self.inner.lock().await.on_append_entries(args).await
    }

    pub async fn append_entries_result(&self, peer: ServerId, result: AppendEntriesResult) -> RaftResult<()> {
        self.inner.lock().await.on_append_entries_result(peer, result).await
    }

    pub async fn install_snapshot(&self, args: InstallSnapshot) -> RaftResult<InstallSnapshotResult> {
        self.inner.lock().await.on_install_snapshot(args).await
    }

    pub async fn install_snapshot_result(&self, peer: ServerId, result: InstallSnapshotResult) -> RaftResult<()> {
        self.inner.lock().await.on_install_snapshot_result(peer, result).await
    }

    /// Propose a command to be replicated and applied. Resolves only
    /// once the entry commits and is applied locally; fails with
    /// `NotLeader` if this server isn't currently leading.
    #[instrument(level = "debug", skip(self, command))]
    pub async fn client_propose(&self, command: Bytes) -> Result<Bytes, ClientError> {
        let mut core = self.inner.lock().await;
        if !core.role().is_leader() {
            return Err(ClientError::NotLeader(core.current_leader()));
        }
        let index = core.last_log_id().index + 1;
        let entry = crate::log::Entry::command(LogId::new(core.current_term(), index), command.clone());
        core.log.append(std::iter::once(entry));
        core.trigger(index).await.map_err(ClientError::from)?;
        drop(core);

        self.wait_for_applied(index).await?;
        Ok(command)
    }

    async fn wait_for_applied(&self, index: u64) -> Result<(), ClientError> {
        let mut rx = self.metrics_rx.clone();
        loop {
            if rx.borrow().last_applied >= index {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(ClientError::ShuttingDown);
            }
        }
    }

    pub async fn add_server(&self, id: ServerId, address: String) -> Result<(), ClientError> {
        self.inner.lock().await.add_server(id, address).await
    }

    pub async fn promote_server(&self, id: ServerId) -> Result<(), ClientError> {
        self.inner.lock().await.promote_server(id).await
    }

    pub async fn remove_server(&self, id: ServerId) -> Result<(), ClientError> {
        self.inner.lock().await.remove_server(id).await
    }

    pub async fn close(&self) {
        self.inner.lock().await.close().await
    }

    /// Snapshot of every `(term, index)` pair currently held in the
    /// in-memory log, oldest first. Used by the test harness's safety
    /// checker to verify Leader Append-Only across successive steps.
    pub async fn debug_log_ids(&self) -> Vec<LogId> {
        let core = self.inner.lock().await;
        (core.log.first_index()..=core.log.last_index()).filter_map(|i| core.log.get(i).map(|e| e.id)).collect()
    }

    /// Read-only access to the application state machine, for test
    /// assertions.
    pub async fn with_fsm<R>(&self, f: impl FnOnce(&F) -> R) -> R {
        let core = self.inner.lock().await;
        f(&core.fsm)
    }

    /// Whether `id` currently counts toward quorum in this server's
    /// configuration. Used by tests to check a promotion did or didn't
    /// take effect.
    pub async fn is_voter(&self, id: ServerId) -> bool {
        self.inner.lock().await.configuration.is_voter(id)
    }
}
