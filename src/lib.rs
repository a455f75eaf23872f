//! A Raft consensus core: log storage, election, replication, snapshot
//! installation and single-server membership changes, decoupled from disk
//! I/O, wire encoding and timekeeping behind a small set of traits.
//!
//! The [`testing`] module additionally provides a deterministic, virtual-clock
//! driven harness used to verify the safety properties of the consensus
//! engine without relying on real wall-clock time or a real network.

pub mod config;
pub mod core;
pub mod error;
pub mod fsm;
pub mod io;
pub mod log;
pub mod membership;
pub mod messages;
pub mod metrics;
pub mod raft;
#[cfg(feature = "testing")]
pub mod testing;

pub use config::Config;
pub use config::ConfigBuilder;
pub use error::ClientError;
pub use error::RaftError;
pub use error::RaftResult;
pub use fsm::Fsm;
pub use io::Clock;
pub use io::RaftStorage;
pub use io::RaftTransport;
pub use log::Entry;
pub use log::EntryType;
pub use log::Log;
pub use membership::Configuration;
pub use membership::ServerId;
pub use membership::ServerRecord;
pub use metrics::RaftMetrics;
pub use raft::Raft;

/// The identifier of a server within a cluster. Zero is never a valid id.
pub type NodeId = ServerId;

/// A (term, index) pair identifying a position in the replicated log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub const ZERO: LogId = LogId { term: 0, index: 0 };

    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// The role a server is currently playing within the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Role {
    /// No persistent state has been loaded yet.
    Unavailable,
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate)
    }
}
