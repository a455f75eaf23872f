//! Wire-agnostic RPC message shapes exchanged between servers, per spec §6.2.
//!
//! These types carry no transport framing of their own; a `RaftTransport`
//! implementation is responsible for encoding/decoding and routing them to
//! the right peer.

use serde::{Deserialize, Serialize};

use crate::log::Entry;
use crate::membership::{Configuration, ServerId};
use crate::LogId;

/// Sent by a candidate to request a vote for the current term.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: u64,
    pub candidate_id: ServerId,
    pub last_log: LogId,
    /// True when the candidate disclaims leadership and is only trying to
    /// transfer an existing leader's term forward (unused unless a caller
    /// triggers a leadership transfer; always false for ordinary elections).
    pub disrupt_leader: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResult {
    pub term: u64,
    pub vote_granted: bool,
}

/// Sent by the leader, both to replicate entries and as a heartbeat when
/// `entries` is empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: u64,
    pub leader_id: ServerId,
    pub prev_log: LogId,
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    pub term: u64,
    pub success: bool,
    /// The follower's own last-stored index at response time. The leader
    /// must use this, not its own log state, to advance `match_index` and
    /// `next_index` (spec §4.4 step 5, §6.2).
    pub last_log_index: u64,
    /// Hint for fast backtracking on conflict (spec §4.4): the first index
    /// at which the follower's log diverges from `prev_log`, or its last
    /// index if its log was simply too short.
    pub conflict: Option<LogId>,
}

/// Sent by the leader to bring a far-behind follower up to date without
/// replaying the full log, per spec §4.5.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstallSnapshot {
    pub term: u64,
    pub leader_id: ServerId,
    pub last_included: LogId,
    pub configuration: Configuration,
    /// Opaque state-machine snapshot bytes; chunking across multiple RPCs is
    /// left to the `RaftTransport` implementation, matching spec §4.5's note
    /// that transfer framing is out of scope for the core.
    pub data: bytes::Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotResult {
    pub term: u64,
}

/// Envelope wrapping one of the four RPC kinds plus routing metadata, for
/// use by a `RaftTransport` implementation (spec §4.9's dispatcher).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcRequest {
    RequestVote(RequestVote),
    AppendEntries(AppendEntries),
    InstallSnapshot(InstallSnapshot),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcResponse {
    RequestVote(RequestVoteResult),
    AppendEntries(AppendEntriesResult),
    InstallSnapshot(InstallSnapshotResult),
}

impl RpcRequest {
    pub fn term(&self) -> u64 {
        match self {
            RpcRequest::RequestVote(r) => r.term,
            RpcRequest::AppendEntries(r) => r.term,
            RpcRequest::InstallSnapshot(r) => r.term,
        }
    }
}

impl RpcResponse {
    pub fn term(&self) -> u64 {
        match self {
            RpcResponse::RequestVote(r) => r.term,
            RpcResponse::AppendEntries(r) => r.term,
            RpcResponse::InstallSnapshot(r) => r.term,
        }
    }
}
