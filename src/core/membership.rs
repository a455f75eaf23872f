//! Single-server membership changes and promotion catch-up tracking
//! (spec §4.7). Joint consensus is explicitly out of scope; at most one
//! server is added or removed between consecutive committed
//! configurations.

use tracing::{debug, info};

use crate::core::{PromotionState, RaftCore, RoleState};
use crate::error::{ClientError, RaftResult};
use crate::fsm::Fsm;
use crate::io::{Clock, RaftStorage, RaftTransport};
use crate::log::Entry;
use crate::membership::{ServerId, ServerRecord};
use crate::LogId;

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    fn require_leader_and_idle(&self) -> Result<(), ClientError> {
        if !self.role().is_leader() {
            return Err(ClientError::NotLeader(self.current_leader));
        }
        if self.configuration_uncommitted_index != 0 {
            return Err(ClientError::ConfigurationBusy);
        }
        Ok(())
    }

    /// Propose the addition of a new, initially non-voting server
    /// (spec §4.7's "add server").
    pub async fn add_server(&mut self, id: ServerId, address: String) -> Result<(), ClientError> {
        self.require_leader_and_idle()?;
        if self.configuration.contains(id) {
            return Err(ClientError::InvalidChange(format!("server {id} already present")));
        }
        let new_config = self.configuration.with_added(ServerRecord::non_voter(id, address));
        self.append_configuration(new_config).await.map_err(ClientError::from)?;
        if let RoleState::Leader { replication, .. } = &mut self.role_state {
            replication.insert(id, crate::core::ReplicationRecord::new(self.log.last_index()));
        }
        Ok(())
    }

    /// Begin the catch-up process that, on success, flips `id` to voting
    /// (spec §4.7's "promote server").
    pub async fn promote_server(&mut self, id: ServerId) -> Result<(), ClientError> {
        self.require_leader_and_idle()?;
        if !self.configuration.contains(id) || self.configuration.is_voter(id) {
            return Err(ClientError::InvalidChange(format!("server {id} is not a non-voting member")));
        }
        if let RoleState::Leader { promotion, .. } = &mut self.role_state {
            *promotion = Some(PromotionState {
                promotee_id: id,
                round_number: 0,
                round_start_index: self.log.last_index(),
                round_start_millis: self.leader_clock,
                promotion_start_millis: self.leader_clock,
            });
        }
        info!(id = %self.id, promotee = %id, "starting promotion catch-up");
        Ok(())
    }

    /// Propose removal of `id` (spec §4.7's "remove server"). If `id` is
    /// this leader, it steps down once the removal commits (handled by
    /// the apply loop).
    pub async fn remove_server(&mut self, id: ServerId) -> Result<(), ClientError> {
        self.require_leader_and_idle()?;
        if !self.configuration.contains(id) {
            return Err(ClientError::InvalidChange(format!("server {id} is not present")));
        }
        let new_config = self.configuration.with_removed(id);
        self.append_configuration(new_config).await.map_err(ClientError::from)?;
        if let RoleState::Leader { replication, .. } = &mut self.role_state {
            replication.remove(&id);
        }
        Ok(())
    }

    async fn append_configuration(&mut self, new_config: crate::membership::Configuration) -> RaftResult<()> {
        let index = self.log.last_index() + 1;
        let entry = Entry::configuration(LogId::new(self.current_term, index), new_config);
        self.log.append(std::iter::once(entry));
        self.configuration_uncommitted_index = index;
        self.trigger(index).await
    }

    /// Update the promotee's catch-up round on a successful replication
    /// ack, per spec §4.7. Completing a round within `election_timeout`
    /// finishes the promotion; otherwise a new round starts.
    pub(crate) fn advance_promotion_round(&mut self, peer: ServerId, matched_index: u64) {
        let last_log_index = self.log.last_index();
        let (promotee_id, round_complete) = match &mut self.role_state {
            RoleState::Leader { promotion: Some(p), .. } if p.promotee_id == peer => {
                if matched_index >= p.round_start_index {
                    (p.promotee_id, true)
                } else {
                    (p.promotee_id, false)
                }
            }
            _ => return,
        };
        if !round_complete {
            return;
        }
        let round_duration = if let RoleState::Leader { promotion: Some(p), .. } = &self.role_state {
            self.leader_clock.saturating_sub(p.round_start_millis)
        } else {
            return;
        };
        let fast_enough = round_duration <= self.config.election_timeout;
        if fast_enough {
            debug!(id = %self.id, promotee = %promotee_id, "promotion catch-up converged");
            if let RoleState::Leader { promotion, .. } = &mut self.role_state {
                *promotion = None;
            }
            let new_config = self.configuration.with_promoted(promotee_id);
            self.queue_configuration_append(new_config);
        } else if let RoleState::Leader { promotion: Some(p), .. } = &mut self.role_state {
            p.round_number += 1;
            p.round_start_index = last_log_index;
            p.round_start_millis = self.leader_clock;
        }
    }

    /// Queues the voting-flip configuration entry; the actual storage
    /// submit happens on the next `tick_promotion` call so this can stay
    /// synchronous (it's invoked from inside `handle_append_entries_result`).
    fn queue_configuration_append(&mut self, new_config: crate::membership::Configuration) {
        let index = self.log.last_index() + 1;
        let entry = Entry::configuration(LogId::new(self.current_term, index), new_config);
        self.log.append(std::iter::once(entry));
        self.configuration_uncommitted_index = index;
        self.pending_trigger_index = Some(index);
    }

    /// Abort an in-flight promotion if it has exceeded its overall time
    /// budget or round count, per spec §4.7.
    pub(crate) async fn tick_promotion(&mut self, _elapsed_ms: u64) -> RaftResult<()> {
        if let Some(index) = self.pending_trigger_index.take() {
            self.trigger(index).await?;
        }

        let abort = match &self.role_state {
            RoleState::Leader { promotion: Some(p), .. } => {
                let elapsed = self.leader_clock.saturating_sub(p.promotion_start_millis);
                p.round_number >= self.config.max_catch_up_rounds
                    || elapsed >= self.config.max_catch_up_duration.as_millis() as u64
            }
            _ => false,
        };
        if abort {
            if let RoleState::Leader { promotion, .. } = &mut self.role_state {
                if let Some(p) = promotion.take() {
                    info!(id = %self.id, promotee = %p.promotee_id, "promotion abandoned: catch-up did not converge in time");
                }
            }
        }
        Ok(())
    }
}
