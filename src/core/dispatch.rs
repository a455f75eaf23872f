//! RPC dispatcher: the shared term-comparison preamble plus routing to
//! the election/replication/snapshot handlers (spec §4.9).

use tracing::debug;

use crate::core::RaftCore;
use crate::error::RaftResult;
use crate::fsm::Fsm;
use crate::io::{Clock, HardState, RaftStorage, RaftTransport};
use crate::membership::ServerId;
use crate::messages::{
    AppendEntries, AppendEntriesResult, InstallSnapshot, InstallSnapshotResult, RequestVote, RequestVoteResult,
};

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    /// Apply the shared preamble for an incoming term: step down to
    /// follower at the newer term, or reject outright if the message's
    /// term is stale. Returns `Some(response)` when the message should be
    /// answered immediately without reaching the specific handler.
    async fn preamble(&mut self, term: u64) -> RaftResult<bool> {
        if term > self.current_term {
            debug!(id = %self.id, new_term = term, old_term = self.current_term, "observed newer term");
            self.current_term = term;
            self.voted_for = None;
            self.storage.save_hard_state(&HardState { current_term: term, voted_for: None }).await?;
            self.step_down_to_follower();
        }
        Ok(term >= self.current_term)
    }

    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn on_request_vote(&mut self, args: RequestVote) -> RaftResult<RequestVoteResult> {
        if !self.preamble(args.term).await? {
            return Ok(RequestVoteResult { term: self.current_term, vote_granted: false });
        }
        self.handle_request_vote(args).await
    }

    #[tracing::instrument(level = "debug", skip(self, result))]
    pub async fn on_request_vote_result(&mut self, voter: ServerId, result: RequestVoteResult) -> RaftResult<()> {
        if !self.preamble(result.term).await? {
            return Ok(());
        }
        self.handle_request_vote_result(voter, result).await
    }

    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn on_append_entries(&mut self, args: AppendEntries) -> RaftResult<AppendEntriesResult> {
        if !self.preamble(args.term).await? {
            return Ok(AppendEntriesResult {
                term: self.current_term,
                success: false,
                last_log_index: self.last_stored,
                conflict: None,
            });
        }
        self.handle_append_entries(args).await
    }

    #[tracing::instrument(level = "debug", skip(self, result))]
    pub async fn on_append_entries_result(&mut self, peer: ServerId, result: AppendEntriesResult) -> RaftResult<()> {
        if !self.preamble(result.term).await? {
            return Ok(());
        }
        self.handle_append_entries_result(peer, result).await
    }

    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn on_install_snapshot(&mut self, args: InstallSnapshot) -> RaftResult<InstallSnapshotResult> {
        if !self.preamble(args.term).await? {
            return Ok(InstallSnapshotResult { term: self.current_term });
        }
        self.handle_install_snapshot(args).await
    }

    /// Treated as an acknowledgement that the peer is now caught up to
    /// the leader's current snapshot boundary, per spec §4.9's
    /// "InstallSnapshotResult → treat as AppendEntriesResult with
    /// last_log_index = snapshot.index" rule.
    #[tracing::instrument(level = "debug", skip(self, result))]
    pub async fn on_install_snapshot_result(&mut self, peer: ServerId, result: InstallSnapshotResult) -> RaftResult<()> {
        if !self.preamble(result.term).await? {
            return Ok(());
        }
        let snapshot_index = self.snapshot.index;
        if let crate::core::RoleState::Leader { replication, .. } = &mut self.role_state {
            if let Some(record) = replication.get_mut(&peer) {
                record.match_index = snapshot_index;
                record.next_index = snapshot_index + 1;
                record.mode = crate::core::ReplicationMode::Probe;
                record.last_contact = self.leader_clock;
            }
        }
        self.advance_promotion_round(peer, snapshot_index);
        self.recompute_commit_index();
        self.apply_committed().await
    }
}
