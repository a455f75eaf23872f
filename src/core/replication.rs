//! Leader-side replication: the append pipeline, commit-index
//! advancement, and the apply loop shared with the follower path (spec
//! §4.3, §4.6), grounded on the original implementation's
//! `replication.c`.

use tracing::{debug, warn};

use crate::core::{RaftCore, ReplicationMode, RoleState};
use crate::error::RaftResult;
use crate::fsm::Fsm;
use crate::io::{Clock, RaftStorage, RaftTransport};
use crate::log::EntryType;
use crate::membership::ServerId;
use crate::messages::{AppendEntries, AppendEntriesResult, InstallSnapshot};

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    /// Submit newly appended local entries (if `index != 0`) to storage
    /// and fan out append requests to every peer, per spec §4.3.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) async fn trigger(&mut self, index: u64) -> RaftResult<()> {
        if index != 0 {
            let entries = self.log.range(index, self.log.last_index() + 1);
            if !entries.is_empty() {
                self.storage.append_to_log(&entries).await?;
                self.last_stored = self.log.last_index();
            }
        }

        let peers: Vec<ServerId> = match &self.role_state {
            RoleState::Leader { replication, .. } => replication.keys().copied().collect(),
            _ => return Ok(()),
        };
        for peer in peers {
            self.send_append_entries(peer).await?;
        }
        self.recompute_commit_index();
        self.apply_committed().await
    }

    /// Build and send one AppendEntries (or InstallSnapshot, if the peer
    /// has fallen behind the compaction window) to `peer`, per spec §4.3.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) async fn send_append_entries(&mut self, peer: ServerId) -> RaftResult<()> {
        let next_index = match &self.role_state {
            RoleState::Leader { replication, .. } => match replication.get(&peer) {
                Some(r) => r.next_index,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        if next_index > 1 && next_index - 1 < self.log.first_index() && next_index - 1 != self.snapshot.index {
            return self.send_install_snapshot(peer).await;
        }

        let (prev_index, prev_term) = if next_index == 1 {
            (0, 0)
        } else {
            let prev_index = next_index - 1;
            let term = if prev_index == self.snapshot.index {
                self.snapshot.term
            } else {
                match self.log.term_of(prev_index) {
                    Some(t) if t != 0 => t,
                    _ => return self.send_install_snapshot(peer).await,
                }
            };
            (prev_index, term)
        };

        let entries = self.log.range(next_index, self.log.last_index() + 1);
        let request = AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log: crate::LogId::new(prev_term, prev_index),
            entries,
            leader_commit: self.commit_index,
        };

        if let Err(err) = self.transport.send_append_entries(peer, request).await {
            debug!(id = %self.id, %peer, error = %err, "append_entries send failed, will retry next tick");
        }
        Ok(())
    }

    async fn send_install_snapshot(&mut self, peer: ServerId) -> RaftResult<()> {
        if let RoleState::Leader { replication, .. } = &mut self.role_state {
            if let Some(record) = replication.get_mut(&peer) {
                record.mode = ReplicationMode::Snapshot;
            }
        }
        let data = match self.fsm.snapshot(self.snapshot.last_log_id()).await {
            Ok(data) => data,
            Err(err) => {
                warn!(id = %self.id, %peer, error = %err, "snapshot build failed, will retry");
                return Ok(());
            }
        };
        let request = InstallSnapshot {
            term: self.current_term,
            leader_id: self.id,
            last_included: self.snapshot.last_log_id(),
            configuration: self.snapshot.configuration.clone(),
            data,
        };
        if let Err(err) = self.transport.send_install_snapshot(peer, request).await {
            debug!(id = %self.id, %peer, error = %err, "install_snapshot send failed");
        }
        Ok(())
    }

    /// Apply a peer's AppendEntries response, per spec §4.3's exact
    /// sequencing including the stale-rejection guard (see DESIGN.md for
    /// the Open Question resolution on its precise semantics).
    #[tracing::instrument(level = "debug", skip(self, result))]
    pub async fn handle_append_entries_result(&mut self, peer: ServerId, result: AppendEntriesResult) -> RaftResult<()> {
        if result.term > self.current_term {
            return Ok(()); // preamble already stepped us down
        }

        let last_log_index = self.log.last_index().max(self.snapshot.index);

        let record = match &mut self.role_state {
            RoleState::Leader { replication, .. } => match replication.get_mut(&peer) {
                Some(r) => r,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        record.last_contact = self.leader_clock;
        if record.mode == ReplicationMode::Snapshot {
            record.mode = ReplicationMode::Probe;
        }

        // Stale-rejection guard: a response that could only have been
        // generated by an earlier, already-superseded next_index is
        // dropped rather than rewinding progress we've since confirmed.
        if record.match_index > 0 && record.match_index == record.next_index.saturating_sub(1) && !result.success {
            return Ok(());
        }

        if !result.success {
            let conflict_index = result.conflict.map(|c| c.index).unwrap_or(0);
            if conflict_index != 0 && conflict_index < record.next_index.saturating_sub(1) {
                record.next_index = conflict_index.min(last_log_index).max(1);
            } else {
                record.next_index = record.next_index.saturating_sub(1).max(1);
            }
            record.mode = ReplicationMode::Probe;
            let peer_copy = peer;
            drop(record);
            return self.send_append_entries(peer_copy).await;
        }

        let matched_index = result.last_log_index.min(last_log_index);
        record.match_index = matched_index;
        record.next_index = matched_index + 1;
        record.mode = ReplicationMode::Pipeline;

        self.advance_promotion_round(peer, matched_index);
        self.recompute_commit_index();
        self.apply_committed().await
    }

    /// Commit rule from spec §4.6: the largest N such that N is newer
    /// than the current commit index, term_of(N) is the current term,
    /// and a majority of voters (self included) have match_index ≥ N.
    pub(crate) fn recompute_commit_index(&mut self) {
        let replication = match &self.role_state {
            RoleState::Leader { replication, .. } => replication,
            _ => return,
        };

        let mut matched: std::collections::BTreeMap<ServerId, u64> = std::collections::BTreeMap::new();
        if self.is_voter() {
            matched.insert(self.id, self.log.last_index().max(self.snapshot.index));
        }
        for (peer, record) in replication {
            if self.configuration.is_voter(*peer) {
                matched.insert(*peer, record.match_index);
            }
        }

        let candidate = self.configuration.quorum_match_index(&matched);
        if candidate <= self.commit_index {
            return;
        }
        let term_ok = if candidate == self.snapshot.index {
            self.snapshot.term == self.current_term
        } else {
            self.log.term_of(candidate) == Some(self.current_term)
        };
        if term_ok {
            self.commit_index = candidate;
        }
    }

    /// Apply every newly committed entry to the FSM, in order, per spec
    /// §4.6's apply loop. Shared by the leader and follower paths.
    pub(crate) async fn apply_committed(&mut self) -> RaftResult<()> {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let entry = match self.log.get(index) {
                Some(e) => e.clone(),
                None => break,
            };
            match entry.entry_type {
                EntryType::Blank => {}
                EntryType::Command(payload) => {
                    if let Err(err) = self.fsm.apply(index, payload).await {
                        warn!(id = %self.id, index, error = %err, "fsm apply failed");
                    }
                }
                EntryType::Configuration(new_config) => {
                    self.configuration = new_config;
                    if self.configuration_uncommitted_index == index {
                        self.configuration_uncommitted_index = 0;
                    }
                    if self.role().is_leader() && !self.is_member() {
                        debug!(id = %self.id, "removed from configuration, stepping down");
                        self.step_down_to_follower();
                    }
                }
            }
            self.last_applied = index;
        }
        self.storage.save_last_applied(self.last_applied).await?;
        self.report_metrics();
        self.maybe_take_snapshot().await
    }

    /// Trigger a snapshot once enough entries have been applied since the
    /// last one, per spec §4.6.
    async fn maybe_take_snapshot(&mut self) -> RaftResult<()> {
        if self.snapshot_in_progress {
            return Ok(());
        }
        if self.last_applied.saturating_sub(self.snapshot.index) < self.config.snapshot_threshold {
            return Ok(());
        }
        self.snapshot_in_progress = true;
        let last_applied_term = self.log.term_of(self.last_applied).unwrap_or(self.snapshot.term);
        let last_applied_id = crate::LogId::new(last_applied_term, self.last_applied);

        match self.fsm.snapshot(last_applied_id).await {
            Ok(_snapshot_data) => {
                self.snapshot.index = self.last_applied;
                self.snapshot.term = last_applied_term;
                self.snapshot.configuration = self.configuration.clone();
                self.snapshot.configuration_index = self.configuration_uncommitted_index;
                let trailing = self.config.snapshot_trailing_entries;
                let keep_through = self.last_applied.saturating_sub(trailing);
                self.log.shift_prefix(keep_through);
            }
            Err(err) => warn!(id = %self.id, error = %err, "snapshot build failed"),
        }
        self.snapshot_in_progress = false;
        Ok(())
    }
}
