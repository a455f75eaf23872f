//! The state machine a Raft instance replicates commands to, per spec §6.3.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RaftResult;
use crate::LogId;

/// Implemented by the application built on top of this crate.
///
/// `apply` is called once per committed `Command` entry, in log order,
/// exactly as spec §4.8's "apply committed entries" step requires. Blank
/// and `Configuration` entries are never passed to `apply`; the core
/// handles those itself.
#[async_trait]
pub trait Fsm: Send + Sync + 'static {
    async fn apply(&mut self, index: u64, command: Bytes) -> RaftResult<Bytes>;

    /// Produce a snapshot of the state machine as of `last_applied`, for
    /// the leader to use when compacting the log or catching up a
    /// far-behind follower (spec §4.6). The buffer's internal encoding is
    /// entirely up to the application, per spec §6.3's "buffers" contract;
    /// the core only ever moves it, never parses it.
    async fn snapshot(&mut self, last_applied: LogId) -> RaftResult<Bytes>;

    /// Replace the state machine's contents with `snapshot`, taken at
    /// `last_included` (spec §4.5's follower-side install path).
    async fn restore(&mut self, last_included: LogId, snapshot: Bytes) -> RaftResult<()>;
}
