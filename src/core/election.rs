//! Vote solicitation, vote granting, and tally (spec §4.2), grounded on
//! the original implementation's `election.c`
//! (`raft_election__start`/`raft_election__vote`/`raft_election__tally`).

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::core::{RaftCore, ReplicationRecord, RoleState};
use crate::error::RaftResult;
use crate::fsm::Fsm;
use crate::io::{Clock, HardState, RaftStorage, RaftTransport};
use crate::membership::ServerId;
use crate::messages::{RequestVote, RequestVoteResult};
use crate::LogId;

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    /// Start (or restart) an election: bump the term, vote for self,
    /// reset the randomized timer, and solicit votes from every other
    /// voting member.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) async fn start_election(&mut self) -> RaftResult<()> {
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.storage
            .save_hard_state(&HardState { current_term: self.current_term, voted_for: self.voted_for })
            .await?;

        self.reset_election_timer();

        let mut votes = HashSet::new();
        votes.insert(self.id);
        self.role_state = RoleState::Candidate { votes };
        self.current_leader = None;
        self.report_metrics();

        let last_log = self.last_log_id();
        let request = RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log,
            disrupt_leader: false,
        };

        debug!(id = %self.id, term = self.current_term, "soliciting votes");
        for voter in self.configuration.voters() {
            if voter.id == self.id {
                continue;
            }
            let target = voter.id;
            let term = self.current_term;
            // Best-effort, fire-and-forget: a failed send is logged and
            // simply never tallied, matching spec §7's "best-effort
            // failures ... do not abort the caller" rule. The vote, if
            // granted, arrives back later as a RequestVoteResult message.
            if let Err(err) = self.transport.send_request_vote(target, request.clone()).await {
                debug!(id = %self.id, peer = %target, term, error = %err, "request_vote send failed");
            }
        }
        Ok(())
    }

    /// Decide whether to grant a vote, per spec §4.2's exact ordering.
    /// Returns the response to send; never mutates term via the preamble
    /// (the dispatcher does that before calling in).
    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn handle_request_vote(&mut self, args: RequestVote) -> RaftResult<RequestVoteResult> {
        if !self.is_voter() {
            return Ok(RequestVoteResult { term: self.current_term, vote_granted: false });
        }
        if let Some(voted_for) = self.voted_for {
            if voted_for != args.candidate_id && self.current_term == args.term {
                return Ok(RequestVoteResult { term: self.current_term, vote_granted: false });
            }
        }

        let local_last_log = self.last_log_id();
        let grant = local_last_log == LogId::ZERO
            || args.last_log.term > local_last_log.term
            || (args.last_log.term == local_last_log.term && args.last_log.index >= local_last_log.index);

        if grant {
            self.voted_for = Some(args.candidate_id);
            self.storage
                .save_hard_state(&HardState { current_term: self.current_term, voted_for: self.voted_for })
                .await?;
            self.reset_election_timer();
        }

        Ok(RequestVoteResult { term: self.current_term, vote_granted: grant })
    }

    /// Record a granted vote and check for majority, per spec §4.2's
    /// `tally`. Converts to leader on majority.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn handle_request_vote_result(
        &mut self,
        voter: ServerId,
        result: RequestVoteResult,
    ) -> RaftResult<()> {
        if result.term > self.current_term {
            return Ok(()); // handled by the dispatcher preamble already
        }
        if result.term < self.current_term || !result.vote_granted {
            return Ok(());
        }

        let majority = match &mut self.role_state {
            RoleState::Candidate { votes } => {
                votes.insert(voter);
                votes.len() >= self.configuration.quorum()
            }
            _ => false,
        };

        if majority {
            self.become_leader().await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn become_leader(&mut self) -> RaftResult<()> {
        let last_log_index = self.last_log_id().index;
        let mut replication = BTreeMap::new();
        for voter in self.configuration.all() {
            if voter.id == self.id {
                continue;
            }
            replication.insert(voter.id, ReplicationRecord::new(last_log_index));
        }
        self.role_state = RoleState::Leader { replication, promotion: None };
        self.current_leader = Some(self.id);
        self.leader_clock = 0;
        self.heartbeat_timer = 0;
        self.report_metrics();

        debug!(id = %self.id, term = self.current_term, "elected leader");
        // Immediate empty heartbeat to assert leadership right away,
        // matching spec §4.3's "sends an immediate empty heartbeat".
        self.trigger(0).await
    }
}
