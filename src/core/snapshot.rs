//! Follower-side snapshot install path (spec §4.5).

use tracing::debug;

use crate::core::RaftCore;
use crate::error::RaftResult;
use crate::fsm::Fsm;
use crate::io::{Clock, RaftStorage, RaftTransport};
use crate::messages::{InstallSnapshot, InstallSnapshotResult};

impl<F, S, T, C> RaftCore<F, S, T, C>
where
    F: Fsm,
    S: RaftStorage,
    T: RaftTransport,
    C: Clock,
{
    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn handle_install_snapshot(&mut self, args: InstallSnapshot) -> RaftResult<InstallSnapshotResult> {
        self.current_leader = Some(args.leader_id);
        self.reset_election_timer();

        if self.snapshot_in_progress {
            // A local snapshot or install is already underway; the leader
            // will retry, matching spec §4.5's "no effect" clause.
            return Ok(InstallSnapshotResult { term: self.current_term });
        }

        if self.snapshot.index >= args.last_included.index {
            return Ok(InstallSnapshotResult { term: self.current_term });
        }
        if self.log.term_of(args.last_included.index).unwrap_or(0) >= args.last_included.term {
            return Ok(InstallSnapshotResult { term: self.current_term });
        }

        self.snapshot_in_progress = true;
        self.last_applied = args.last_included.index;
        self.log.truncate_suffix(1);
        self.storage.delete_logs_from(1).await?;
        self.last_stored = 0;

        // The payload's encoding is entirely owned by the application; the
        // core only moves the bytes through (spec §6.3).
        self.fsm.restore(args.last_included, args.data.clone()).await?;

        self.log.reset_to_snapshot(args.last_included);
        self.snapshot.index = args.last_included.index;
        self.snapshot.term = args.last_included.term;
        self.last_stored = args.last_included.index;
        self.configuration = args.configuration;
        self.snapshot.configuration = self.configuration.clone();

        self.snapshot_in_progress = false;
        self.commit_index = self.commit_index.max(args.last_included.index);
        self.report_metrics();

        debug!(id = %self.id, index = args.last_included.index, "snapshot installed");
        Ok(InstallSnapshotResult { term: self.current_term })
    }
}
