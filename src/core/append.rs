//! Follower-side AppendEntries handling: log matching check, conflict
//! resolution, and commit-index advancement (spec §4.4).

use tracing::{debug, error};

use crate::core::RaftCore;
use crate::error::{RaftError, RaftResult};
use crate::fsm::Fsm;
use crate::io::{Clock, RaftStorage, RaftTransport};
use crate::log::EntryType;
use crate::messages::{AppendEntries, AppendEntriesResult};
use crate::LogId;

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn handle_append_entries(&mut self, args: AppendEntries) -> RaftResult<AppendEntriesResult> {
        if !self.role().is_follower() {
            self.become_follower();
        }
        self.current_leader = Some(args.leader_id);
        self.reset_election_timer();

        // 1. Log matching check.
        if args.prev_log.index != 0 {
            let local_prev_term = if args.prev_log.index == self.snapshot.index {
                self.snapshot.term
            } else {
                self.log.term_of(args.prev_log.index).unwrap_or(0)
            };
            if local_prev_term == 0 {
                return Ok(self.reject(Some(LogId::new(0, self.log.last_index()))));
            }
            if local_prev_term != args.prev_log.term {
                if args.prev_log.index <= self.commit_index {
                    error!(id = %self.id, index = args.prev_log.index, "log matching violated at a committed index");
                    return Err(RaftError::Shutdown(format!(
                        "log matching property violated at committed index {}",
                        args.prev_log.index
                    )));
                }
                return Ok(self.reject(Some(LogId::new(local_prev_term, args.prev_log.index.saturating_sub(1)))));
            }
        }

        // 2. Conflict resolution: find the first position where the
        // incoming term differs from ours, truncating at that point.
        let mut first_new = args.prev_log.index + 1;
        for (offset, entry) in args.entries.iter().enumerate() {
            let index = args.prev_log.index + 1 + offset as u64;
            match self.log.term_of(index) {
                None => {
                    first_new = index;
                    break;
                }
                Some(local_term) if local_term == entry.id.term => {
                    first_new = index + 1;
                    continue;
                }
                Some(_) => {
                    if index <= self.commit_index {
                        error!(id = %self.id, index, "conflicting entry at a committed index");
                        return Err(RaftError::Shutdown(format!(
                            "conflicting entry at committed index {index}"
                        )));
                    }
                    self.log.truncate_suffix(index);
                    if self.configuration_uncommitted_index >= index {
                        self.configuration_uncommitted_index = 0;
                    }
                    self.storage.delete_logs_from(index).await?;
                    self.last_stored = self.last_stored.min(index - 1);
                    first_new = index;
                    break;
                }
            }
        }

        // 3. Append whatever the leader sent that we don't already have.
        let new_entries: Vec<_> = args
            .entries
            .into_iter()
            .filter(|e| e.id.index >= first_new)
            .collect();

        if !new_entries.is_empty() {
            self.log.append(new_entries.iter().cloned());
            self.storage.append_to_log(&new_entries).await?;
            self.last_stored = self.log.last_index();
            for entry in &new_entries {
                if let EntryType::Configuration(config) = &entry.entry_type {
                    self.configuration_uncommitted_index = entry.id.index;
                    self.configuration = config.clone();
                }
            }
        }

        self.commit_index = args.leader_commit.min(self.last_stored.max(self.snapshot.index));
        self.apply_committed().await?;

        debug!(id = %self.id, last_stored = self.last_stored, "append_entries accepted");
        Ok(AppendEntriesResult { term: self.current_term, success: true, last_log_index: self.last_stored, conflict: None })
    }

    fn reject(&self, conflict: Option<LogId>) -> AppendEntriesResult {
        AppendEntriesResult { term: self.current_term, success: false, last_log_index: self.last_stored, conflict }
    }
}
